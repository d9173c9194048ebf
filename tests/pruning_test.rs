// ============================================================================
// Pruning Tests
// ============================================================================
//
// Messages disappear only once every component tracking them has
// acknowledged, regardless of which pruning path (timer or producer
// piggy-back) runs and how stale its frontier is.
//
// ============================================================================

use outbox::{
    ClaimableStore, ComponentName, HolderId, MemoryStore, MessageId, Producer, PruneReport, Pruner,
};
use std::sync::Arc;
use std::time::Duration;

const LEASE: Duration = Duration::from_millis(2500);

async fn ack_through(store: &MemoryStore, component: &ComponentName, last: i64) {
    let holder = HolderId::new("pruning-test").unwrap();
    loop {
        let claimed = store
            .claim_one(component, &holder, LEASE)
            .await
            .unwrap()
            .expect("message available");
        store.ack(&claimed.lease).await.unwrap();
        if claimed.message.id.get() == last {
            break;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_frontier_follows_slowest_component() {
    let store = Arc::new(MemoryStore::new());
    let a = ComponentName::new("A").unwrap();
    let b = ComponentName::new("B").unwrap();
    store.register_component(&a).await.unwrap();
    store.register_component(&b).await.unwrap();

    let producer = Producer::new(store.clone(), 0);
    for attr in 1..=10u64 {
        producer.append(&serde_json::json!({ "attr": attr })).await.unwrap();
    }

    ack_through(&store, &a, 10).await;
    ack_through(&store, &b, 6).await;

    let pruner = Pruner::new(store.clone());
    assert_eq!(
        pruner.prune_once().await.unwrap(),
        PruneReport {
            frontier: Some(MessageId(7)),
            deleted: 6,
        }
    );
    for id in 7..=10 {
        assert!(store.contains(MessageId(id)).await, "message {} pruned early", id);
    }
}

#[tokio::test(start_paused = true)]
async fn test_stale_frontier_after_new_claims() {
    let store = Arc::new(MemoryStore::new());
    let a = ComponentName::new("A").unwrap();
    store.register_component(&a).await.unwrap();
    for attr in 1..=3u64 {
        store.append(serde_json::json!({ "attr": attr })).await.unwrap();
    }
    ack_through(&store, &a, 3).await;

    let frontier = store.prune_frontier().await.unwrap().unwrap();
    assert_eq!(frontier, MessageId(4));

    // new traffic arrives between computing the frontier and deleting
    let late = store.append(serde_json::json!({ "attr": 4 })).await.unwrap();
    assert_eq!(store.prune_below(MessageId(100)).await.unwrap(), 3);
    assert!(store.contains(late).await);
}

#[tokio::test(start_paused = true)]
async fn test_late_component_does_not_hold_back_pruning() {
    let store = Arc::new(MemoryStore::new());
    let a = ComponentName::new("A").unwrap();
    store.register_component(&a).await.unwrap();
    for attr in 1..=3u64 {
        store.append(serde_json::json!({ "attr": attr })).await.unwrap();
    }

    let late = ComponentName::new("late").unwrap();
    store.register_component(&late).await.unwrap();
    ack_through(&store, &a, 3).await;

    let report = Pruner::new(store.clone()).prune_once().await.unwrap();
    assert_eq!(report.deleted, 3);
    assert_eq!(store.depth().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_producer_piggyback_prune() {
    let store = Arc::new(MemoryStore::new());
    let a = ComponentName::new("A").unwrap();
    store.register_component(&a).await.unwrap();
    let producer = Producer::new(store.clone(), 5);

    for attr in 1..=4u64 {
        producer.append(&serde_json::json!({ "attr": attr })).await.unwrap();
    }
    ack_through(&store, &a, 4).await;
    assert_eq!(producer.depth().await.unwrap(), 4);

    producer.append(&serde_json::json!({ "attr": 5 })).await.unwrap();
    assert_eq!(producer.depth().await.unwrap(), 1);
}
