// ============================================================================
// Consumer loop
// ============================================================================
//
// Idle -> Claiming -> Handling -> Acking -> Idle     (handler succeeded)
// Idle -> Claiming -> Handling -> Idle               (handler failed)
// Idle -> Claiming -> Idle (+ backoff)               (nothing to claim)
//
// A failed handler neither acks nor releases: the lease runs out and the
// message becomes claimable again. The store is never locked while the
// handler runs.
//
// ============================================================================

use crate::message::{ComponentName, HolderId, Message, MessageId};
use crate::store::ClaimableStore;
use async_trait::async_trait;
use futures_util::FutureExt;
use outbox_config::QueueConfig;
use outbox_error::{QueueError, QueueResult};
use outbox_metrics::{
    ACK_CONFLICTS_TOTAL, HANDLER_DURATION_SECONDS, HANDLER_FAILURES_TOTAL, MESSAGES_ACKED_TOTAL,
    MESSAGES_CLAIMED_TOTAL,
};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

const STORAGE_RETRY_BASE: Duration = Duration::from_millis(100);

/// Business logic run for each claimed message
///
/// Returning an error (or panicking) leaves the message unacknowledged; it
/// will be redelivered after its lease expires. Handlers must therefore be
/// idempotent.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a [`MessageHandler`]
pub struct FnHandler<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        (self.0)(message.clone()).await
    }
}

/// Linear backoff for an empty queue: step, 2*step, ... capped at ceiling
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    step: Duration,
    ceiling: Duration,
    attempts: u32,
}

impl LinearBackoff {
    pub fn new(step: Duration, ceiling: Duration) -> Self {
        Self {
            step,
            ceiling,
            attempts: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        self.step.saturating_mul(self.attempts).min(self.ceiling)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Claiming,
    Handling,
    Acking,
}

impl ConsumerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumerState::Idle => "idle",
            ConsumerState::Claiming => "claiming",
            ConsumerState::Handling => "handling",
            ConsumerState::Acking => "acking",
        }
    }
}

/// What one pass of the loop did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// No eligible message
    Empty,
    Acked(MessageId),
    /// Handler failed; the lease is left to expire
    HandlerFailed(MessageId),
    /// Handler succeeded but the lease was lost before the ack
    Conflict(MessageId),
}

/// One competing consumer of a component
pub struct Consumer<S: ClaimableStore + ?Sized, H: MessageHandler + ?Sized> {
    store: Arc<S>,
    handler: Arc<H>,
    component: ComponentName,
    holder: HolderId,
    lease_duration: Duration,
    backoff: LinearBackoff,
    max_storage_retries: u32,
    state: ConsumerState,
}

impl<S, H> Consumer<S, H>
where
    S: ClaimableStore + ?Sized,
    H: MessageHandler + ?Sized,
{
    pub fn new(
        store: Arc<S>,
        handler: Arc<H>,
        component: ComponentName,
        config: &QueueConfig,
    ) -> Self {
        Self {
            store,
            handler,
            holder: HolderId::generate(&component),
            component,
            lease_duration: config.lease_duration(),
            backoff: LinearBackoff::new(config.backoff_step(), config.backoff_ceiling()),
            max_storage_retries: config.max_storage_retries,
            state: ConsumerState::Idle,
        }
    }

    pub fn with_holder(mut self, holder: HolderId) -> Self {
        self.holder = holder;
        self
    }

    pub fn holder(&self) -> &HolderId {
        &self.holder
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    fn transition(&mut self, next: ConsumerState) {
        tracing::trace!(
            holder = %self.holder,
            from = self.state.as_str(),
            to = next.as_str(),
            "Consumer state change"
        );
        self.state = next;
    }

    /// Claim, handle and ack at most one message
    ///
    /// Only storage-level errors are returned; handler failures and lost
    /// leases are reported through [`StepOutcome`].
    pub async fn process_one(&mut self) -> QueueResult<StepOutcome> {
        self.transition(ConsumerState::Claiming);
        let claimed = match self
            .store
            .claim_one(&self.component, &self.holder, self.lease_duration)
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                self.transition(ConsumerState::Idle);
                return Err(e);
            }
        };

        let Some(claimed) = claimed else {
            self.transition(ConsumerState::Idle);
            return Ok(StepOutcome::Empty);
        };

        let id = claimed.message.id;
        let component = self.component.clone();
        let label = component.as_str();
        MESSAGES_CLAIMED_TOTAL.with_label_values(&[label]).inc();
        tracing::debug!(component = %component, message_id = %id, "Claimed message");

        self.transition(ConsumerState::Handling);
        let started = Instant::now();
        let result = AssertUnwindSafe(self.handler.handle(&claimed.message))
            .catch_unwind()
            .await;
        HANDLER_DURATION_SECONDS
            .with_label_values(&[label])
            .observe(started.elapsed().as_secs_f64());

        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(QueueError::handler(format!("{:#}", e))),
            Err(panic) => Some(QueueError::handler(panic_message(panic.as_ref()))),
        };

        if let Some(err) = failure {
            HANDLER_FAILURES_TOTAL.with_label_values(&[label]).inc();
            tracing::warn!(
                component = %component,
                message_id = %id,
                error = %err,
                "Handler failed, message will be redelivered after lease expiry"
            );
            self.transition(ConsumerState::Idle);
            return Ok(StepOutcome::HandlerFailed(id));
        }

        self.transition(ConsumerState::Acking);
        let outcome = match self.store.ack(&claimed.lease).await {
            Ok(()) => {
                MESSAGES_ACKED_TOTAL.with_label_values(&[label]).inc();
                tracing::debug!(component = %component, message_id = %id, "Acknowledged");
                Ok(StepOutcome::Acked(id))
            }
            Err(e @ QueueError::ClaimConflict { .. }) => {
                ACK_CONFLICTS_TOTAL.with_label_values(&[label]).inc();
                e.log();
                Ok(StepOutcome::Conflict(id))
            }
            Err(e) => Err(e),
        };

        self.transition(ConsumerState::Idle);
        outcome
    }

    /// Run until `shutdown` flips to true
    ///
    /// Shutdown stops claiming at once, interrupting a backoff sleep or an
    /// in-flight handler; an abandoned lease simply expires. Storage errors
    /// are retried with exponential backoff and escalate after
    /// `max_storage_retries` consecutive failures.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> QueueResult<()> {
        tracing::info!(
            component = %self.component,
            holder = %self.holder,
            lease_ms = self.lease_duration.as_millis() as u64,
            "Consumer started"
        );

        let mut storage_failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let step = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                step = self.process_one() => step,
            };

            let delay = match step {
                Ok(StepOutcome::Empty) => {
                    storage_failures = 0;
                    let delay = self.backoff.next_delay();
                    tracing::trace!(
                        component = %self.component,
                        delay_ms = delay.as_millis() as u64,
                        "Queue empty, backing off"
                    );
                    delay
                }
                Ok(_) => {
                    storage_failures = 0;
                    self.backoff.reset();
                    continue;
                }
                Err(e) if e.is_retryable() => {
                    storage_failures += 1;
                    if storage_failures > self.max_storage_retries {
                        tracing::error!(
                            component = %self.component,
                            holder = %self.holder,
                            failures = storage_failures,
                            error = %e,
                            "Storage unavailable, giving up"
                        );
                        return Err(e);
                    }
                    let delay = STORAGE_RETRY_BASE.saturating_mul(1u32 << (storage_failures - 1).min(16));
                    tracing::warn!(
                        component = %self.component,
                        attempt = storage_failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Storage error, retrying"
                    );
                    delay
                }
                Err(e) => {
                    e.log();
                    return Err(e);
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }

        self.transition(ConsumerState::Idle);
        tracing::info!(component = %self.component, holder = %self.holder, "Consumer stopped");
        Ok(())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}
