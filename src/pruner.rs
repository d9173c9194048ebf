use crate::message::MessageId;
use crate::store::ClaimableStore;
use outbox_error::QueueResult;
use outbox_metrics::{MESSAGES_PRUNED_TOTAL, QUEUE_DEPTH};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;

/// Outcome of one prune pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PruneReport {
    pub frontier: Option<MessageId>,
    pub deleted: u64,
}

/// Deletes messages every component has acknowledged
///
/// The frontier is read first and the delete repeats the acknowledgment
/// check, so running concurrently with producers and consumers is safe.
pub struct Pruner<S: ClaimableStore + ?Sized> {
    store: Arc<S>,
}

impl<S: ClaimableStore + ?Sized> Clone for Pruner<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: ClaimableStore + ?Sized> Pruner<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn prune_once(&self) -> QueueResult<PruneReport> {
        let Some(frontier) = self.store.prune_frontier().await? else {
            return Ok(PruneReport::default());
        };

        let deleted = self.store.prune_below(frontier).await?;
        if deleted > 0 {
            MESSAGES_PRUNED_TOTAL.inc_by(deleted);
            tracing::info!(
                frontier = %frontier,
                deleted = deleted,
                "Pruned fully acknowledged messages"
            );
        } else {
            tracing::debug!(frontier = %frontier, "Nothing to prune");
        }

        Ok(PruneReport {
            frontier: Some(frontier),
            deleted,
        })
    }

    /// Prune every `interval` until `shutdown` flips to true
    ///
    /// Storage errors are logged and retried on the next tick.
    pub async fn run(self, prune_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_ms = prune_interval.as_millis() as u64,
            "Starting pruner"
        );

        let mut interval = time::interval(prune_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
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

            match self.prune_once().await {
                Ok(_) => {
                    if let Ok(depth) = self.store.depth().await {
                        QUEUE_DEPTH.set(depth as i64);
                    }
                }
                Err(e) => e.log(),
            }
        }

        tracing::info!("Pruner stopped");
    }
}
