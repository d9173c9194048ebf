//! Prometheus metrics for the outbox queue
//!
//! - Producer appends and queue depth
//! - Per-component claims, acks, handler failures and ack conflicts
//! - Reclaimer and pruner throughput

use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    opts, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

// ============================================================================
// Producer Metrics
// ============================================================================

pub static MESSAGES_APPENDED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "outbox_messages_appended_total",
        "Total number of messages durably appended"
    ))
    .expect("Failed to register MESSAGES_APPENDED_TOTAL metric")
});

/// Messages currently held by the store (acknowledged or not)
pub static QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!(
        "outbox_queue_depth",
        "Number of messages currently stored"
    ))
    .expect("Failed to register QUEUE_DEPTH metric")
});

// ============================================================================
// Consumer Metrics
// ============================================================================

pub static MESSAGES_CLAIMED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("outbox_messages_claimed_total", "Leases granted to consumers"),
        &["component"]
    )
    .expect("Failed to register MESSAGES_CLAIMED_TOTAL metric")
});

pub static MESSAGES_ACKED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("outbox_messages_acked_total", "Messages acknowledged"),
        &["component"]
    )
    .expect("Failed to register MESSAGES_ACKED_TOTAL metric")
});

pub static HANDLER_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "outbox_handler_failures_total",
            "Handler errors and panics (message left for redelivery)"
        ),
        &["component"]
    )
    .expect("Failed to register HANDLER_FAILURES_TOTAL metric")
});

/// Late acks rejected because the lease was lost
pub static ACK_CONFLICTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "outbox_ack_conflicts_total",
            "Acks rejected because the lease expired or changed hands"
        ),
        &["component"]
    )
    .expect("Failed to register ACK_CONFLICTS_TOTAL metric")
});

pub static HANDLER_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "outbox_handler_duration_seconds",
        "Wall-clock time spent in message handlers",
        &["component"]
    )
    .expect("Failed to register HANDLER_DURATION_SECONDS metric")
});

// ============================================================================
// Background Task Metrics
// ============================================================================

pub static LEASES_RECLAIMED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "outbox_leases_reclaimed_total",
            "Expired leases returned to the unclaimed pool"
        ),
        &["component"]
    )
    .expect("Failed to register LEASES_RECLAIMED_TOTAL metric")
});

pub static MESSAGES_PRUNED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "outbox_messages_pruned_total",
        "Fully acknowledged messages deleted from the store"
    ))
    .expect("Failed to register MESSAGES_PRUNED_TOTAL metric")
});

/// Render all registered metrics in the Prometheus text format
pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_metrics() {
        MESSAGES_APPENDED_TOTAL.inc();
        MESSAGES_CLAIMED_TOTAL.with_label_values(&["aaa"]).inc();

        let output = gather_metrics().unwrap();
        assert!(output.contains("outbox_messages_appended_total"));
        assert!(output.contains("outbox_messages_claimed_total{component=\"aaa\"}"));
    }
}
