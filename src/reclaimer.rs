use crate::message::ComponentName;
use crate::store::ClaimableStore;
use outbox_error::QueueResult;
use outbox_metrics::LEASES_RECLAIMED_TOTAL;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Background task that returns expired leases to the unclaimed pool
///
/// Claims already treat an expired lease as absent, so the reclaimer is not
/// needed for correctness. It keeps the stored state tidy and makes stuck
/// deliveries visible in logs and metrics.
pub struct Reclaimer<S: ClaimableStore + ?Sized> {
    store: Arc<S>,
    reclaim_interval: Duration,
    jitter: Duration,
}

impl<S: ClaimableStore + ?Sized> Reclaimer<S> {
    pub fn new(store: Arc<S>, reclaim_interval: Duration, jitter: Duration) -> Self {
        Self {
            store,
            reclaim_interval,
            jitter,
        }
    }

    /// One sweep over every registered component
    pub async fn reclaim_once(&self) -> QueueResult<Vec<(ComponentName, u64)>> {
        let components = self.store.components().await?;
        let mut counts = Vec::with_capacity(components.len());

        for component in components {
            let reclaimed = self.store.reclaim_expired(&component).await?;
            if reclaimed > 0 {
                LEASES_RECLAIMED_TOTAL
                    .with_label_values(&[component.as_str()])
                    .inc_by(reclaimed);
                tracing::info!(
                    component = %component,
                    reclaimed = reclaimed,
                    "Reclaimed expired leases"
                );
            }
            counts.push((component, reclaimed));
        }

        Ok(counts)
    }

    fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.reclaim_interval;
        }
        self.reclaim_interval + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    /// Sweep until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_ms = self.reclaim_interval.as_millis() as u64,
            jitter_ms = self.jitter.as_millis() as u64,
            "Starting lease reclaimer"
        );

        loop {
            let delay = self.next_delay();
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

            if let Err(e) = self.reclaim_once().await {
                e.log();
            }
        }

        tracing::info!("Lease reclaimer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DeliveryState, HolderId, MessageId};
    use crate::store::MemoryStore;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_reclaim_once_counts_per_component() {
        let store = Arc::new(MemoryStore::new());
        let a = ComponentName::new("a").unwrap();
        let b = ComponentName::new("b").unwrap();
        store.register_component(&a).await.unwrap();
        store.register_component(&b).await.unwrap();
        store.append(json!({})).await.unwrap();
        store.append(json!({})).await.unwrap();

        let h = HolderId::new("h1").unwrap();
        let lease = Duration::from_millis(100);
        store.claim_one(&a, &h, lease).await.unwrap().unwrap();
        store.claim_one(&a, &h, lease).await.unwrap().unwrap();
        store.claim_one(&b, &h, Duration::from_secs(60)).await.unwrap().unwrap();

        tokio::time::advance(Duration::from_millis(150)).await;

        let reclaimer = Reclaimer::new(store.clone(), Duration::from_secs(1), Duration::ZERO);
        let counts = reclaimer.reclaim_once().await.unwrap();
        assert_eq!(counts, vec![(a.clone(), 2), (b.clone(), 0)]);
        assert_eq!(
            store.delivery_state(MessageId(1), &a).await,
            Some(DeliveryState::Unclaimed)
        );
    }

    #[tokio::test]
    async fn test_delay_stays_within_jitter() {
        let reclaimer = Reclaimer::new(
            Arc::new(MemoryStore::new()),
            Duration::from_millis(1000),
            Duration::from_millis(250),
        );
        for _ in 0..100 {
            let delay = reclaimer.next_delay();
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1250));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reclaims_in_background() {
        let store = Arc::new(MemoryStore::new());
        let a = ComponentName::new("a").unwrap();
        store.register_component(&a).await.unwrap();
        let id = store.append(json!({})).await.unwrap();
        store
            .claim_one(&a, &HolderId::new("h1").unwrap(), Duration::from_millis(500))
            .await
            .unwrap()
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let reclaimer = Reclaimer::new(store.clone(), Duration::from_secs(1), Duration::ZERO);
        let handle = tokio::spawn(reclaimer.run(rx));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(store.delivery_state(id, &a).await, Some(DeliveryState::Unclaimed));

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_ends_when_sender_dropped() {
        let (tx, rx) = watch::channel(false);
        let reclaimer = Reclaimer::new(
            Arc::new(MemoryStore::new()),
            Duration::from_secs(1),
            Duration::ZERO,
        );
        let handle = tokio::spawn(reclaimer.run(rx));
        drop(tx);

        tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("reclaimer kept running without a shutdown sender")
            .unwrap();
    }
}
