//! Demo producer and handler used by the `outbox` binary.

use crate::consumer::MessageHandler;
use crate::message::Message;
use crate::producer::Producer;
use crate::store::ClaimableStore;
use async_trait::async_trait;
use outbox_error::QueueResult;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;

pub const DEFAULT_FAILURE_RATE: f64 = 0.2;

const MAX_HANDLING_DELAY_MS: u64 = 200;
const MAX_PRODUCE_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoPayload {
    pub attr: u64,
}

/// Handler that fails at random and otherwise simulates some work
pub struct DemoHandler {
    failure_rate: f64,
}

impl DemoHandler {
    pub fn new(failure_rate: f64) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }
}

impl Default for DemoHandler {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_RATE)
    }
}

#[async_trait]
impl MessageHandler for DemoHandler {
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        let (fail, delay_ms) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_bool(self.failure_rate),
                rng.gen_range(0..=MAX_HANDLING_DELAY_MS),
            )
        };

        let payload: DemoPayload = message.decode()?;
        tracing::info!(
            message_id = %message.id,
            attr = payload.attr,
            failed = fail,
            "Handling demo message"
        );

        if fail {
            anyhow::bail!("simulated failure for message {}", message.id);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        Ok(())
    }
}

/// Append `{"attr": n}` payloads at random sub-second intervals until
/// shutdown, logging the queue depth after every append
pub async fn run_producer<S: ClaimableStore + ?Sized>(
    producer: &Producer<S>,
    mut shutdown: watch::Receiver<bool>,
) -> QueueResult<u64> {
    let mut produced = 0;

    loop {
        let delay = Duration::from_millis(rand::thread_rng().gen_range(0..MAX_PRODUCE_DELAY_MS));
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                // sender dropped
                if changed.is_err() {
                    break;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }

        let id = producer.append(&DemoPayload { attr: produced }).await?;
        produced += 1;
        let depth = producer.depth().await?;
        tracing::info!(message_id = %id, depth = depth, "Produced demo message");
    }

    Ok(produced)
}
