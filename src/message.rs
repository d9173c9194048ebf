// ============================================================================
// Message, Lease and naming types
// ============================================================================

use chrono::{DateTime, Utc};
use outbox_config::MAX_NAME_LENGTH;
use outbox_error::{QueueError, QueueResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned message id; strictly increasing in append order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl MessageId {
    pub fn get(self) -> i64 {
        self.0
    }

    pub fn next(self) -> MessageId {
        MessageId(self.0 + 1)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        MessageId(id)
    }
}

fn validate_name(kind: &str, value: &str, max_len: usize) -> QueueResult<()> {
    if value.is_empty() {
        return Err(QueueError::InvalidName(format!("{} cannot be empty", kind)));
    }
    if value.len() > max_len {
        return Err(QueueError::InvalidName(format!(
            "{} exceeds {} characters",
            kind, max_len
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(QueueError::InvalidName(format!(
            "{} '{}' contains invalid characters (allowed: a-z, A-Z, 0-9, -, _, .)",
            kind, value
        )));
    }
    Ok(())
}

/// Consumer group identity. Each component tracks its own delivery state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ComponentName(String);

impl ComponentName {
    pub fn new(name: impl Into<String>) -> QueueResult<Self> {
        let name = name.into().trim().to_string();
        validate_name("component name", &name, MAX_NAME_LENGTH)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ComponentName {
    type Error = QueueError;

    fn try_from(value: String) -> QueueResult<Self> {
        ComponentName::new(value)
    }
}

impl From<ComponentName> for String {
    fn from(name: ComponentName) -> Self {
        name.0
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one consumer instance holding leases
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HolderId(String);

impl HolderId {
    const MAX_LENGTH: usize = 128;

    pub fn new(id: impl Into<String>) -> QueueResult<Self> {
        let id = id.into().trim().to_string();
        validate_name("holder id", &id, Self::MAX_LENGTH)?;
        Ok(Self(id))
    }

    /// A fresh holder id for a consumer task of `component`
    pub fn generate(component: &ComponentName) -> Self {
        Self(format!("{}-{}", component, uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for HolderId {
    type Error = QueueError;

    fn try_from(value: String) -> QueueResult<Self> {
        HolderId::new(value)
    }
}

impl From<HolderId> for String {
    fn from(id: HolderId) -> Self {
        id.0
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored message as handed to consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub content: serde_json::Value,
}

impl Message {
    /// Deserialize the opaque content into a caller type
    pub fn decode<T: DeserializeOwned>(&self) -> QueueResult<T> {
        Ok(serde_json::from_value(self.content.clone())?)
    }
}

/// Time-bounded exclusive ownership of one message for one component
///
/// A lease is identified by its holder and its expiry: acking with a lease
/// whose expiry no longer matches the stored one is a conflict, even for the
/// same holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub message_id: MessageId,
    pub component: ComponentName,
    pub holder: HolderId,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// An expired lease is void even before the reclaimer reaps it
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Result of a successful claim
#[derive(Debug, Clone)]
pub struct ClaimedMessage {
    pub message: Message,
    pub lease: Lease,
}

/// Per-component delivery state of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    Unclaimed,
    Claimed {
        holder: HolderId,
        expires_at: DateTime<Utc>,
    },
    Acknowledged,
}

impl DeliveryState {
    /// Whether a claim at `now` may take this entry
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self {
            DeliveryState::Unclaimed => true,
            DeliveryState::Claimed { expires_at, .. } => *expires_at < now,
            DeliveryState::Acknowledged => false,
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        matches!(self, DeliveryState::Acknowledged)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Unclaimed => "unclaimed",
            DeliveryState::Claimed { .. } => "claimed",
            DeliveryState::Acknowledged => "acknowledged",
        }
    }
}
