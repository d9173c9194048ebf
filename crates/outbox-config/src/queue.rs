// ============================================================================
// Queue Configuration
// ============================================================================
//
// Delivery protocol tuning shared by producers, consumers, the reclaimer and
// the pruner. Every process of one deployment must agree on `components`.
//
// ============================================================================

use crate::constants::*;
use crate::env_or;
use anyhow::{bail, Result};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Registered consumer groups (comma separated in QUEUE_COMPONENTS)
    pub components: Vec<String>,
    pub lease_duration_ms: u64,
    pub reclaim_interval_ms: u64,
    /// Upper bound of the random delay added to each reclaim tick
    pub reclaim_jitter_ms: u64,
    pub prune_interval_ms: u64,
    /// Producers run a prune pass after this many appends (0 disables)
    pub prune_every_appends: u64,
    pub backoff_step_ms: u64,
    pub backoff_ceiling_ms: u64,
    /// Consecutive storage failures tolerated by a consumer before it gives up
    pub max_storage_retries: u32,
}

impl QueueConfig {
    pub(crate) fn from_env() -> Self {
        let components = std::env::var("QUEUE_COMPONENTS")
            .unwrap_or_else(|_| DEFAULT_COMPONENTS.to_string());

        Self {
            components: parse_components(&components),
            lease_duration_ms: env_or("QUEUE_LEASE_DURATION_MS", DEFAULT_LEASE_DURATION_MS),
            reclaim_interval_ms: env_or("QUEUE_RECLAIM_INTERVAL_MS", DEFAULT_RECLAIM_INTERVAL_MS),
            reclaim_jitter_ms: env_or("QUEUE_RECLAIM_JITTER_MS", DEFAULT_RECLAIM_JITTER_MS),
            prune_interval_ms: env_or("QUEUE_PRUNE_INTERVAL_MS", DEFAULT_PRUNE_INTERVAL_MS),
            prune_every_appends: env_or("QUEUE_PRUNE_EVERY_APPENDS", DEFAULT_PRUNE_EVERY_APPENDS),
            backoff_step_ms: env_or("QUEUE_BACKOFF_STEP_MS", DEFAULT_BACKOFF_STEP_MS),
            backoff_ceiling_ms: env_or("QUEUE_BACKOFF_CEILING_MS", DEFAULT_BACKOFF_CEILING_MS),
            max_storage_retries: env_or("QUEUE_MAX_STORAGE_RETRIES", DEFAULT_MAX_STORAGE_RETRIES),
        }
    }

    /// Reject settings the delivery protocol cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.components.is_empty() {
            bail!("QUEUE_COMPONENTS must name at least one component");
        }
        if let Some(name) = self.components.iter().find(|c| c.len() > MAX_NAME_LENGTH) {
            bail!("component name '{}' exceeds {} characters", name, MAX_NAME_LENGTH);
        }
        if self.lease_duration_ms == 0 {
            bail!("QUEUE_LEASE_DURATION_MS must be greater than zero");
        }
        if self.reclaim_interval_ms == 0 || self.prune_interval_ms == 0 {
            bail!("reclaim and prune intervals must be greater than zero");
        }
        if self.backoff_ceiling_ms < self.backoff_step_ms {
            bail!(
                "QUEUE_BACKOFF_CEILING_MS ({}) must not be below QUEUE_BACKOFF_STEP_MS ({})",
                self.backoff_ceiling_ms,
                self.backoff_step_ms
            );
        }
        Ok(())
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(self.reclaim_interval_ms)
    }

    pub fn reclaim_jitter(&self) -> Duration {
        Duration::from_millis(self.reclaim_jitter_ms)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }

    pub fn backoff_step(&self) -> Duration {
        Duration::from_millis(self.backoff_step_ms)
    }

    pub fn backoff_ceiling(&self) -> Duration {
        Duration::from_millis(self.backoff_ceiling_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            components: parse_components(DEFAULT_COMPONENTS),
            lease_duration_ms: DEFAULT_LEASE_DURATION_MS,
            reclaim_interval_ms: DEFAULT_RECLAIM_INTERVAL_MS,
            reclaim_jitter_ms: DEFAULT_RECLAIM_JITTER_MS,
            prune_interval_ms: DEFAULT_PRUNE_INTERVAL_MS,
            prune_every_appends: DEFAULT_PRUNE_EVERY_APPENDS,
            backoff_step_ms: DEFAULT_BACKOFF_STEP_MS,
            backoff_ceiling_ms: DEFAULT_BACKOFF_CEILING_MS,
            max_storage_retries: DEFAULT_MAX_STORAGE_RETRIES,
        }
    }
}

fn parse_components(raw: &str) -> Vec<String> {
    let mut components: Vec<String> = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !components.iter().any(|c| c == name) {
            components.push(name.to_string());
        }
    }
    components
}
