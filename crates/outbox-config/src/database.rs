// ============================================================================
// Database Configuration
// ============================================================================

use crate::env_or;

/// PostgreSQL pool settings for the row-store backend
#[derive(Clone, Debug)]
pub struct DbConfig {
    /// Maximum number of pooled connections
    pub max_connections: u32,
    /// Seconds to wait for a free connection before failing the operation
    pub acquire_timeout_secs: u64,
    /// Seconds an idle connection stays open
    pub idle_timeout_secs: u64,
}

impl DbConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            acquire_timeout_secs: env_or("DB_ACQUIRE_TIMEOUT_SECS", 30),
            idle_timeout_secs: env_or("DB_IDLE_TIMEOUT_SECS", 600),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}
