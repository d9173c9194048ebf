// ============================================================================
// Redis Stream Configuration
// ============================================================================

use crate::constants::*;
use crate::env_or;
use anyhow::{bail, Result};

/// Layout and scan limits for the log-backed store
#[derive(Clone, Debug)]
pub struct RedisStreamConfig {
    /// Stream key; the id sequence and lease hashes are derived from it
    /// (`{key}:seq`, `{key}:lease:{group}`)
    pub stream_key: String,
    /// How many pending entries a claim or reclaim inspects per call
    pub pending_scan_limit: usize,
    /// Maximum entries deleted by one prune call
    pub prune_batch: usize,
}

impl RedisStreamConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            stream_key: std::env::var("REDIS_STREAM_KEY")
                .unwrap_or_else(|_| DEFAULT_STREAM_KEY.to_string()),
            pending_scan_limit: env_or("REDIS_PENDING_SCAN_LIMIT", DEFAULT_PENDING_SCAN_LIMIT),
            prune_batch: env_or("REDIS_PRUNE_BATCH", DEFAULT_PRUNE_BATCH),
        }
    }

    /// A zero scan limit would strand expired pending entries forever and a
    /// zero batch would make pruning a no-op
    pub fn validate(&self) -> Result<()> {
        if self.stream_key.is_empty() {
            bail!("REDIS_STREAM_KEY must not be empty");
        }
        if self.pending_scan_limit == 0 {
            bail!("REDIS_PENDING_SCAN_LIMIT must be greater than zero");
        }
        if self.prune_batch == 0 {
            bail!("REDIS_PRUNE_BATCH must be greater than zero");
        }
        Ok(())
    }

    pub fn sequence_key(&self) -> String {
        format!("{}:seq", self.stream_key)
    }

    pub fn lease_key(&self, group: &str) -> String {
        format!("{}:lease:{}", self.stream_key, group)
    }
}

impl Default for RedisStreamConfig {
    fn default() -> Self {
        Self {
            stream_key: DEFAULT_STREAM_KEY.to_string(),
            pending_scan_limit: DEFAULT_PENDING_SCAN_LIMIT,
            prune_batch: DEFAULT_PRUNE_BATCH,
        }
    }
}
