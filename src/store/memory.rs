// ============================================================================
// In-memory store
// ============================================================================
//
// Process-local implementation of the delivery protocol. One mutex guards
// the whole state, which makes every operation trivially atomic. Time is
// read from the tokio clock so tests can pause and advance it.
//
// ============================================================================

use super::ClaimableStore;
use crate::message::{
    ClaimedMessage, ComponentName, DeliveryState, HolderId, Lease, Message, MessageId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outbox_error::{QueueError, QueueResult};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct StoredMessage {
    content: serde_json::Value,
    deliveries: HashMap<ComponentName, DeliveryState>,
}

impl StoredMessage {
    fn fully_acknowledged(&self) -> bool {
        self.deliveries.values().all(DeliveryState::is_acknowledged)
    }
}

#[derive(Default)]
struct Inner {
    last_id: i64,
    components: Vec<ComponentName>,
    messages: BTreeMap<MessageId, StoredMessage>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Clock used for lease expiry: wall time at creation plus tokio time
    /// elapsed since, so a paused runtime also pauses lease expiry
    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.started_at + elapsed
    }

    /// Delivery state of one message for one component (test inspection)
    pub async fn delivery_state(
        &self,
        id: MessageId,
        component: &ComponentName,
    ) -> Option<DeliveryState> {
        let inner = self.inner.lock().await;
        inner
            .messages
            .get(&id)
            .and_then(|m| m.deliveries.get(component))
            .cloned()
    }

    pub async fn contains(&self, id: MessageId) -> bool {
        self.inner.lock().await.messages.contains_key(&id)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClaimableStore for MemoryStore {
    async fn register_component(&self, component: &ComponentName) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner.components.contains(component) {
            inner.components.push(component.clone());
        }
        Ok(())
    }

    async fn components(&self) -> QueueResult<Vec<ComponentName>> {
        Ok(self.inner.lock().await.components.clone())
    }

    async fn append(&self, content: serde_json::Value) -> QueueResult<MessageId> {
        let mut inner = self.inner.lock().await;
        inner.last_id += 1;
        let id = MessageId(inner.last_id);

        let deliveries = inner
            .components
            .iter()
            .map(|c| (c.clone(), DeliveryState::Unclaimed))
            .collect();
        inner.messages.insert(
            id,
            StoredMessage {
                content,
                deliveries,
            },
        );

        Ok(id)
    }

    async fn claim_one(
        &self,
        component: &ComponentName,
        holder: &HolderId,
        lease_duration: Duration,
    ) -> QueueResult<Option<ClaimedMessage>> {
        let lease_duration = chrono::Duration::from_std(lease_duration)
            .map_err(|_| QueueError::config("lease duration out of range"))?;

        let mut inner = self.inner.lock().await;
        if !inner.components.contains(component) {
            return Err(QueueError::UnknownComponent(component.to_string()));
        }

        let now = self.now();
        let expires_at = now + lease_duration;

        for (id, stored) in inner.messages.iter_mut() {
            let Some(state) = stored.deliveries.get_mut(component) else {
                continue;
            };
            if !state.is_claimable(now) {
                continue;
            }

            *state = DeliveryState::Claimed {
                holder: holder.clone(),
                expires_at,
            };

            return Ok(Some(ClaimedMessage {
                message: Message {
                    id: *id,
                    content: stored.content.clone(),
                },
                lease: Lease {
                    message_id: *id,
                    component: component.clone(),
                    holder: holder.clone(),
                    expires_at,
                },
            }));
        }

        Ok(None)
    }

    async fn ack(&self, lease: &Lease) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let now = self.now();

        let state = inner
            .messages
            .get_mut(&lease.message_id)
            .and_then(|m| m.deliveries.get_mut(&lease.component));

        let Some(state) = state else {
            return Err(QueueError::conflict(
                lease.component.as_str(),
                lease.message_id.get(),
            ));
        };

        let held = matches!(
            &*state,
            DeliveryState::Claimed { holder, expires_at }
                if *holder == lease.holder && *expires_at == lease.expires_at
        );
        if !held || lease.is_expired(now) {
            return Err(QueueError::conflict(
                lease.component.as_str(),
                lease.message_id.get(),
            ));
        }

        *state = DeliveryState::Acknowledged;
        Ok(())
    }

    async fn reclaim_expired(&self, component: &ComponentName) -> QueueResult<u64> {
        let mut inner = self.inner.lock().await;
        let now = self.now();
        let mut reclaimed = 0;

        for stored in inner.messages.values_mut() {
            if let Some(state) = stored.deliveries.get_mut(component) {
                if matches!(state, DeliveryState::Claimed { expires_at, .. } if *expires_at < now) {
                    *state = DeliveryState::Unclaimed;
                    reclaimed += 1;
                }
            }
        }

        Ok(reclaimed)
    }

    async fn prune_frontier(&self) -> QueueResult<Option<MessageId>> {
        let inner = self.inner.lock().await;

        let required = inner
            .messages
            .iter()
            .find(|(_, m)| !m.fully_acknowledged())
            .map(|(id, _)| *id);

        Ok(required.or_else(|| inner.messages.keys().next_back().map(|id| id.next())))
    }

    async fn prune_below(&self, frontier: MessageId) -> QueueResult<u64> {
        let mut inner = self.inner.lock().await;

        let doomed: Vec<MessageId> = inner
            .messages
            .range(..frontier)
            .take_while(|(_, m)| m.fully_acknowledged())
            .map(|(id, _)| *id)
            .collect();

        for id in &doomed {
            inner.messages.remove(id);
        }

        Ok(doomed.len() as u64)
    }

    async fn depth(&self) -> QueueResult<u64> {
        Ok(self.inner.lock().await.messages.len() as u64)
    }
}
