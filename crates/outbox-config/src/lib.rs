// ============================================================================
// Outbox Config - Centralized configuration management
// ============================================================================
//
// Every outbox process (producer, consumer, reclaimer, pruner) loads the same
// configuration from environment variables, with sensible defaults for
// everything except connection URLs.
//
// ============================================================================

mod constants;
mod database;
mod queue;
mod redis;

pub use constants::MAX_NAME_LENGTH;
pub use database::DbConfig;
pub use queue::QueueConfig;
pub use redis::RedisStreamConfig;

use anyhow::{bail, Context, Result};
use std::str::FromStr;

/// Which durable store backs the queue
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local store, used by tests and single-process demos
    Memory,
    /// Row store with `FOR UPDATE SKIP LOCKED` claims
    Postgres,
    /// Stream with consumer groups and Lua-scripted claims
    Redis,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" => Ok(StoreBackend::Memory),
            "postgres" | "postgresql" | "pg" => Ok(StoreBackend::Postgres),
            "redis" | "streams" => Ok(StoreBackend::Redis),
            other => bail!("unknown QUEUE_BACKEND '{}'", other),
        }
    }
}

/// Main configuration structure for outbox processes
#[derive(Clone, Debug)]
pub struct Config {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub rust_log: String,

    // Sub-configurations
    pub queue: QueueConfig,
    pub db: DbConfig,
    pub redis: RedisStreamConfig,
}

impl Config {
    /// Load configuration from environment variables (and `.env`, if present)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let backend = std::env::var("QUEUE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse::<StoreBackend>()?;

        let config = Self {
            backend,
            database_url: std::env::var("DATABASE_URL").ok(),
            redis_url: std::env::var("REDIS_URL").ok(),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            queue: QueueConfig::from_env(),
            db: DbConfig::from_env(),
            redis: RedisStreamConfig::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.queue.validate().context("invalid queue configuration")?;
        self.redis
            .validate()
            .context("invalid redis stream configuration")?;

        match self.backend {
            StoreBackend::Postgres if self.database_url.is_none() => {
                bail!("DATABASE_URL is required when QUEUE_BACKEND=postgres")
            }
            StoreBackend::Redis if self.redis_url.is_none() => {
                bail!("REDIS_URL is required when QUEUE_BACKEND=redis")
            }
            _ => Ok(()),
        }
    }

    /// A config for the in-memory backend with default tuning
    pub fn memory() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: None,
            redis_url: None,
            rust_log: "info".to_string(),
            queue: QueueConfig::default(),
            db: DbConfig::default(),
            redis: RedisStreamConfig::default(),
        }
    }
}

/// Mask the credentials part of a connection URL for logging
///
/// `postgres://user:secret@db:5432/outbox` becomes `postgres://***@db:5432/outbox`.
pub fn redacted_url(url: &str) -> String {
    match url.rfind('@') {
        Some(at_pos) => {
            let protocol_end = url.find("://").map(|p| p + 3).unwrap_or(0);
            format!("{}***{}", &url[..protocol_end], &url[at_pos..])
        }
        None => url.to_string(),
    }
}

pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key = %key, value = %raw, "Unparseable value, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "QUEUE_BACKEND",
            "DATABASE_URL",
            "REDIS_URL",
            "QUEUE_COMPONENTS",
            "QUEUE_LEASE_DURATION_MS",
            "REDIS_PENDING_SCAN_LIMIT",
            "REDIS_PRUNE_BATCH",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("PG".parse::<StoreBackend>().unwrap(), StoreBackend::Postgres);
        assert_eq!("redis".parse::<StoreBackend>().unwrap(), StoreBackend::Redis);
        assert_eq!(" memory ".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("kafka".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_redacted_url() {
        assert_eq!(
            redacted_url("postgres://user:secret@db:5432/outbox"),
            "postgres://***@db:5432/outbox"
        );
        assert_eq!(redacted_url("redis://127.0.0.1:6379"), "redis://127.0.0.1:6379");
    }

    #[test]
    #[serial]
    fn test_from_env_memory_backend() {
        clear_env();
        std::env::set_var("QUEUE_BACKEND", "memory");
        std::env::set_var("QUEUE_COMPONENTS", "billing,search");
        std::env::set_var("QUEUE_LEASE_DURATION_MS", "not-a-number");

        let config = Config::from_env().unwrap();
        assert_eq!(config.backend, StoreBackend::Memory);
        assert_eq!(config.queue.components, vec!["billing", "search"]);
        assert_eq!(config.queue.lease_duration_ms, 2500);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_requires_backend_url() {
        clear_env();
        std::env::set_var("QUEUE_BACKEND", "redis");
        assert!(Config::from_env().is_err());

        std::env::set_var("REDIS_URL", "redis://127.0.0.1:6379");
        let config = Config::from_env().unwrap();
        assert_eq!(config.redis.lease_key("billing"), "outbox:lease:billing");
        assert_eq!(config.redis.sequence_key(), "outbox:seq");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_zero_redis_limits() {
        clear_env();
        std::env::set_var("QUEUE_BACKEND", "redis");
        std::env::set_var("REDIS_URL", "redis://127.0.0.1:6379");

        std::env::set_var("REDIS_PENDING_SCAN_LIMIT", "0");
        assert!(Config::from_env().is_err());
        std::env::remove_var("REDIS_PENDING_SCAN_LIMIT");

        std::env::set_var("REDIS_PRUNE_BATCH", "0");
        assert!(Config::from_env().is_err());
        std::env::remove_var("REDIS_PRUNE_BATCH");

        assert!(Config::from_env().is_ok());
        clear_env();
    }
}
