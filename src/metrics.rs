// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the turndown controller.
//!
//! All metrics live under the namespace prefix `turndown_firestoned_io_`
//! (prometheus-safe version of "turndown.firestoned.io") and are exposed on
//! the `/metrics` endpoint.
//!
//! # Metrics Categories
//!
//! - **Reconciliation Metrics** - schedule reconciliations and their outcomes
//! - **Scale Operation Metrics** - turndowns/turnups, durations, pool resizes
//! - **Provider Metrics** - cloud API retries (one increment per retry attempt)
//! - **Error Metrics** - failures by error kind

use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

/// Namespace prefix for all turndown metrics (prometheus-safe)
const METRICS_NAMESPACE: &str = "turndown_firestoned_io";

/// Global Prometheus metrics registry
///
/// All metrics are registered here and exposed via the `/metrics` endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Total number of schedule reconciliations by status
///
/// Labels:
/// - `status`: Outcome (`success`, `error`)
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of schedule reconciliations by status",
    );
    let counter = CounterVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of schedule reconciliations in seconds
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of schedule reconciliations in seconds",
    )
    .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]);
    let histogram = HistogramVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

// ============================================================================
// Scale Operation Metrics
// ============================================================================

/// Total number of scale operations by direction and status
///
/// Labels:
/// - `operation`: `scaledown` or `scaleup`
/// - `status`: `success`, `error`, or `noop`
pub static SCALE_OPERATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_scale_operations_total"),
        "Total number of scale operations by direction and status",
    );
    let counter = CounterVec::new(opts, &["operation", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of scale operations in seconds
///
/// Buckets stretch to the 30-minute operation deadline.
pub static SCALE_OPERATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_scale_operation_duration_seconds"),
        "Duration of scale operations in seconds by direction",
    )
    .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0]);
    let histogram = HistogramVec::new(opts, &["operation"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

/// Total number of node pools resized
///
/// Labels:
/// - `provider`: backend name (`gke`, `eks`, `aws`)
/// - `direction`: `down` or `up`
pub static NODE_POOLS_RESIZED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_node_pools_resized_total"),
        "Total number of node pools resized by provider and direction",
    );
    let counter = CounterVec::new(opts, &["provider", "direction"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of nodes drained
pub static NODES_DRAINED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        format!("{METRICS_NAMESPACE}_nodes_drained_total"),
        "Total number of nodes drained during turndowns",
    )
    .unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Provider Metrics
// ============================================================================

/// Total number of cloud provider mutations that needed retries
///
/// Incremented once per mutation that entered retries, however many attempts
/// it took to settle.
///
/// Labels:
/// - `provider`: backend name
/// - `operation`: short operation name (e.g. `set_node_pool_sizes`)
pub static PROVIDER_RETRIES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_provider_retries_total"),
        "Total number of cloud provider retries by provider and operation",
    );
    let counter = CounterVec::new(opts, &["provider", "operation"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Error Metrics
// ============================================================================

/// Total number of errors by kind
///
/// Labels:
/// - `kind`: error kind (e.g. `ProviderUnavailable`, `DrainBudgetExceeded`)
pub static ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_errors_total"),
        "Total number of errors by kind",
    );
    let counter = CounterVec::new(opts, &["kind"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Recording Helpers
// ============================================================================

/// Record a successful reconciliation and its duration.
pub fn record_reconciliation_success(duration: Duration) {
    RECONCILIATION_TOTAL.with_label_values(&["success"]).inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&["success"])
        .observe(duration.as_secs_f64());
}

/// Record a failed reconciliation and its duration.
pub fn record_reconciliation_error(duration: Duration) {
    RECONCILIATION_TOTAL.with_label_values(&["error"]).inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&["error"])
        .observe(duration.as_secs_f64());
}

/// Record a completed scale operation.
pub fn record_scale_operation(operation: &str, status: &str, duration: Duration) {
    SCALE_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();
    SCALE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
}

/// Record a cloud provider mutation entering retries.
pub fn record_provider_retry(provider: &str, operation: &str) {
    PROVIDER_RETRIES_TOTAL
        .with_label_values(&[provider, operation])
        .inc();
}

/// Record a resized node pool.
pub fn record_pool_resized(provider: &str, direction: &str) {
    NODE_POOLS_RESIZED_TOTAL
        .with_label_values(&[provider, direction])
        .inc();
}

/// Record a drained node.
pub fn record_node_drained() {
    NODES_DRAINED_TOTAL.inc();
}

/// Record an error by kind.
pub fn record_error(kind: &str) {
    ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

/// Gather all registered metrics in the Prometheus text exposition format.
///
/// # Errors
///
/// Returns an error if encoding fails or the output is not valid UTF-8.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod metrics_tests;
