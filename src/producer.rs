use crate::message::MessageId;
use crate::pruner::Pruner;
use crate::store::ClaimableStore;
use outbox_error::QueueResult;
use outbox_metrics::{MESSAGES_APPENDED_TOTAL, QUEUE_DEPTH};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Appends messages and occasionally prunes behind the slowest component
pub struct Producer<S: ClaimableStore + ?Sized> {
    store: Arc<S>,
    pruner: Pruner<S>,
    prune_every: u64,
    appended: AtomicU64,
}

impl<S: ClaimableStore + ?Sized> Producer<S> {
    /// `prune_every` appends trigger one prune pass; 0 disables it
    pub fn new(store: Arc<S>, prune_every: u64) -> Self {
        Self {
            pruner: Pruner::new(store.clone()),
            store,
            prune_every,
            appended: AtomicU64::new(0),
        }
    }

    /// Durably append `payload`; the message is visible to every registered
    /// component once this returns
    pub async fn append<T: Serialize + ?Sized>(&self, payload: &T) -> QueueResult<MessageId> {
        let content = serde_json::to_value(payload)?;
        let id = self.store.append(content).await?;
        MESSAGES_APPENDED_TOTAL.inc();
        tracing::debug!(message_id = %id, "Appended message");

        let count = self.appended.fetch_add(1, Ordering::Relaxed) + 1;
        if self.prune_every > 0 && count % self.prune_every == 0 {
            // the append already succeeded; a failed prune is retried later
            if let Err(e) = self.pruner.prune_once().await {
                e.log();
            }
        }

        Ok(id)
    }

    /// Current queue length, also published as a gauge
    pub async fn depth(&self) -> QueueResult<u64> {
        let depth = self.store.depth().await?;
        QUEUE_DEPTH.set(depth as i64);
        Ok(depth)
    }
}
