//! Prometheus metrics for the approval engine.
//!
//! Exposes a standard `/metrics` endpoint that Prometheus can scrape.
//! Counters live in the global default registry and are registered on
//! first use.

use once_cell::sync::Lazy;
use prometheus::{
    opts, register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec,
    TextEncoder,
};

struct ApprovalMetrics {
    callbacks_total: CounterVec,
    callback_duration_seconds: HistogramVec,
    instantiations_total: CounterVec,
    expired_total: CounterVec,
    notifications_total: CounterVec,
}

static METRICS: Lazy<ApprovalMetrics> = Lazy::new(|| {
    let callbacks_total = register_counter_vec!(
        opts!("approvals_callbacks_total", "Approval callbacks by outcome"),
        &["outcome"]
    )
    .expect("failed to register approvals_callbacks_total");

    let callback_duration_seconds = register_histogram_vec!(
        prometheus::histogram_opts!(
            "approvals_callback_duration_seconds",
            "Callback processing latency in seconds",
            vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
        ),
        &["outcome"]
    )
    .expect("failed to register approvals_callback_duration_seconds");

    let instantiations_total = register_counter_vec!(
        opts!(
            "approvals_instantiations_total",
            "Submitted requests by instantiation result"
        ),
        &["result"]
    )
    .expect("failed to register approvals_instantiations_total");

    let expired_total = register_counter_vec!(
        opts!("approvals_expired_total", "Approval records moved to expired"),
        &["source"]
    )
    .expect("failed to register approvals_expired_total");

    let notifications_total = register_counter_vec!(
        opts!("approvals_notifications_total", "Notification deliveries"),
        &["channel", "result"]
    )
    .expect("failed to register approvals_notifications_total");

    ApprovalMetrics {
        callbacks_total,
        callback_duration_seconds,
        instantiations_total,
        expired_total,
        notifications_total,
    }
});

pub fn record_callback(outcome: &str, duration_secs: f64) {
    METRICS.callbacks_total.with_label_values(&[outcome]).inc();
    METRICS
        .callback_duration_seconds
        .with_label_values(&[outcome])
        .observe(duration_secs);
}

pub fn record_instantiation(result: &str) {
    METRICS.instantiations_total.with_label_values(&[result]).inc();
}

/// `source` is `callback` or `sweep`.
pub fn record_expired(source: &str, count: usize) {
    if count > 0 {
        METRICS
            .expired_total
            .with_label_values(&[source])
            .inc_by(count as f64);
    }
}

pub fn record_notification(channel: &str, result: &str) {
    METRICS
        .notifications_total
        .with_label_values(&[channel, result])
        .inc();
}

/// Encode all registered metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

// ── Tests ─────────────────────────────────────────────────────
