//! Error taxonomy shared by every outbox store, producer and consumer.
//!
//! Only [`QueueError::StorageUnavailable`] is meant to escalate past the
//! consumer loop. Message-level failures (`ClaimConflict`, `HandlerFailure`)
//! are absorbed and end in redelivery once the lease runs out.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Error, Debug)]
pub enum QueueError {
    // ===== Storage =====
    /// The durable store could not be reached or could not commit
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    // ===== Delivery protocol =====
    /// The caller no longer owns the lease it tried to act on: the lease
    /// expired, was reclaimed, or the message was claimed by another holder
    #[error("claim conflict on message {message_id} for component '{component}'")]
    ClaimConflict { component: String, message_id: i64 },

    /// Business logic failed while handling a message
    #[error("handler failed: {0}")]
    HandlerFailure(String),

    #[error("component '{0}' is not registered")]
    UnknownComponent(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    // ===== Serialization =====
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ===== Configuration =====
    #[error("configuration error: {0}")]
    Config(String),
}

impl QueueError {
    /// Get error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            QueueError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            QueueError::ClaimConflict { .. } => "CLAIM_CONFLICT",
            QueueError::HandlerFailure(_) => "HANDLER_FAILURE",
            QueueError::UnknownComponent(_) => "UNKNOWN_COMPONENT",
            QueueError::InvalidName(_) => "INVALID_NAME",
            QueueError::Serialization(_) => "SERIALIZATION_ERROR",
            QueueError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Whether an outer loop may retry the failed operation after a backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::StorageUnavailable(_))
    }

    /// Message-level failures that end in redelivery rather than an error exit
    pub fn is_message_level(&self) -> bool {
        matches!(
            self,
            QueueError::ClaimConflict { .. } | QueueError::HandlerFailure(_)
        )
    }

    /// Log this error with a level matching its severity
    pub fn log(&self) {
        let code = self.error_code();

        if self.is_message_level() {
            tracing::warn!(error = %self, error_code = %code, "Message-level failure");
        } else {
            tracing::error!(error = %self, error_code = %code, "Queue operation failed");
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        QueueError::StorageUnavailable(msg.into())
    }

    pub fn conflict(component: impl Into<String>, message_id: i64) -> Self {
        QueueError::ClaimConflict {
            component: component.into(),
            message_id,
        }
    }

    pub fn handler(msg: impl Into<String>) -> Self {
        QueueError::HandlerFailure(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        QueueError::Config(msg.into())
    }
}

// ============================================================================
// Conversion from backend error types
// ============================================================================

#[cfg(feature = "database")]
impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = %err, "Database error occurred");
        QueueError::StorageUnavailable(format!("database: {}", err))
    }
}

#[cfg(feature = "database")]
impl From<sqlx::migrate::MigrateError> for QueueError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        QueueError::StorageUnavailable(format!("migration: {}", err))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        tracing::error!(error = %err, "Redis error occurred");
        QueueError::StorageUnavailable(format!("redis: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_storage_errors_are_retryable() {
        assert!(QueueError::storage("connection refused").is_retryable());
        assert!(!QueueError::conflict("aaa", 1).is_retryable());
        assert!(!QueueError::handler("boom").is_retryable());
        assert!(!QueueError::config("bad").is_retryable());
    }

    #[test]
    fn test_message_level_classification() {
        assert!(QueueError::conflict("aaa", 7).is_message_level());
        assert!(QueueError::handler("boom").is_message_level());
        assert!(!QueueError::storage("down").is_message_level());
    }

    #[test]
    fn test_display_and_codes() {
        let err = QueueError::conflict("billing", 42);
        assert_eq!(
            err.to_string(),
            "claim conflict on message 42 for component 'billing'"
        );
        assert_eq!(err.error_code(), "CLAIM_CONFLICT");
        assert_eq!(
            QueueError::UnknownComponent("x".into()).error_code(),
            "UNKNOWN_COMPONENT"
        );
    }
}
