// ============================================================================
// Configuration Constants
// ============================================================================

// Lease must comfortably exceed the slowest expected handler run.
pub(crate) const DEFAULT_LEASE_DURATION_MS: u64 = 2500;

// Reclaimer cadence; jitter spreads sweeps from many consumer processes
pub(crate) const DEFAULT_RECLAIM_INTERVAL_MS: u64 = 1000;
pub(crate) const DEFAULT_RECLAIM_JITTER_MS: u64 = 250;

// Pruning
pub(crate) const DEFAULT_PRUNE_INTERVAL_MS: u64 = 5000;
pub(crate) const DEFAULT_PRUNE_EVERY_APPENDS: u64 = 5;

// Linear backoff on an empty queue: 1s, 2s, 3s, 4s, 4s, ...
pub(crate) const DEFAULT_BACKOFF_STEP_MS: u64 = 1000;
pub(crate) const DEFAULT_BACKOFF_CEILING_MS: u64 = 4000;

pub(crate) const DEFAULT_MAX_STORAGE_RETRIES: u32 = 5;

pub(crate) const DEFAULT_COMPONENTS: &str = "aaa";

// Redis stream layout
pub(crate) const DEFAULT_STREAM_KEY: &str = "outbox";
pub(crate) const DEFAULT_PENDING_SCAN_LIMIT: usize = 100;
pub(crate) const DEFAULT_PRUNE_BATCH: usize = 1000;

pub const MAX_NAME_LENGTH: usize = 64;
