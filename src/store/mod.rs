// ============================================================================
// Claimable Store - durable message storage with per-component leases
// ============================================================================
//
// Every backend implements the same contract. Each operation below is a
// single atomic unit against the backend:
//
// - memory   - one mutex guards select + mutate
// - postgres - one SQL statement (claims use FOR UPDATE SKIP LOCKED)
// - redis    - one Lua script over a stream with consumer groups
//
// An expired lease is treated as absent by every operation: it is claimable
// and it cannot be acknowledged.
//
// ============================================================================

pub mod memory;
pub mod postgres;
pub mod redis_streams;

use crate::message::{ClaimedMessage, ComponentName, HolderId, Lease, MessageId};
use async_trait::async_trait;
use outbox_config::{redacted_url, Config, StoreBackend};
use outbox_error::{QueueError, QueueResult};
use std::sync::Arc;
use std::time::Duration;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use redis_streams::RedisStreamStore;

/// Storage contract shared by the row store and the log store
#[async_trait]
pub trait ClaimableStore: Send + Sync {
    /// Register a consumer group (idempotent). The component tracks every
    /// message appended from now on.
    async fn register_component(&self, component: &ComponentName) -> QueueResult<()>;

    /// Registered consumer groups
    async fn components(&self) -> QueueResult<Vec<ComponentName>>;

    /// Durably append a message; the returned id is larger than every id
    /// returned before it
    async fn append(&self, content: serde_json::Value) -> QueueResult<MessageId>;

    /// Lease the oldest message of `component` that is unclaimed or whose
    /// lease has expired. `None` when nothing is eligible.
    ///
    /// Fails with `UnknownComponent` if the component is not registered.
    async fn claim_one(
        &self,
        component: &ComponentName,
        holder: &HolderId,
        lease_duration: Duration,
    ) -> QueueResult<Option<ClaimedMessage>>;

    /// Mark the leased message acknowledged for the lease's component.
    ///
    /// Fails with `ClaimConflict` unless the stored lease is still the given
    /// one and has not expired.
    async fn ack(&self, lease: &Lease) -> QueueResult<()>;

    /// Return expired leases of `component` to the unclaimed pool.
    /// Acknowledged messages are never touched.
    async fn reclaim_expired(&self, component: &ComponentName) -> QueueResult<u64>;

    /// Lowest message id still required by some component, or one past the
    /// newest message when everything is acknowledged
    async fn prune_frontier(&self) -> QueueResult<Option<MessageId>>;

    /// Delete messages below `frontier` that every tracking component has
    /// acknowledged. The acknowledgment check is repeated inside the delete,
    /// so a stale frontier cannot remove a live message.
    async fn prune_below(&self, frontier: MessageId) -> QueueResult<u64>;

    /// Number of messages currently stored
    async fn depth(&self) -> QueueResult<u64>;
}

/// Open the configured backend and register the configured components
pub async fn connect(config: &Config) -> QueueResult<Arc<dyn ClaimableStore>> {
    let store: Arc<dyn ClaimableStore> = match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store: messages do not survive a restart");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| QueueError::config("DATABASE_URL is not set"))?;
            tracing::info!(url = %redacted_url(url), "Connecting to PostgreSQL");
            Arc::new(PostgresStore::connect(url, &config.db).await?)
        }
        StoreBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| QueueError::config("REDIS_URL is not set"))?;
            tracing::info!(url = %redacted_url(url), "Connecting to Redis");
            Arc::new(RedisStreamStore::connect(url, config.redis.clone()).await?)
        }
    };

    for name in &config.queue.components {
        let component = ComponentName::new(name.as_str())?;
        store.register_component(&component).await?;
        tracing::info!(component = %component, "Component registered");
    }

    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_memory_registers_components() {
        let mut config = Config::memory();
        config.queue.components = vec!["billing".to_string(), "search".to_string()];

        let store = connect(&config).await.unwrap();
        let components = store.components().await.unwrap();
        assert_eq!(
            components,
            vec![
                ComponentName::new("billing").unwrap(),
                ComponentName::new("search").unwrap()
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_component() {
        let mut config = Config::memory();
        config.queue.components = vec!["not valid!".to_string()];

        assert!(matches!(
            connect(&config).await,
            Err(QueueError::InvalidName(_))
        ));
    }
}
