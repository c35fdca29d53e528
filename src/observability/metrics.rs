//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `catalogd_reconciliations_total` - Total number of reconciliations
//! - `catalogd_reconciliation_errors_total` - Reconciliation errors by classification
//! - `catalogd_reconciliation_duration_seconds` - Duration of reconciliation operations
//! - `catalogd_unpacks_total` - Source unpacks by result
//! - `catalogd_unpack_cache_hits_total` - Unpacks served from the local cache
//! - `catalogd_storage_operations_total` - Content store operations by operation and result
//! - `catalogd_garbage_collected_entries_total` - Cache entries removed by the startup sweep
//! - `catalogd_http_request_duration_seconds` - Catalog server request duration by status code

use anyhow::Result;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "catalogd_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "catalogd_reconciliation_errors_total",
            "Total number of reconciliation errors by classification",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "catalogd_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static UNPACKS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new("catalogd_unpacks_total", "Total number of unpacks by result"),
        &["result"],
    )
    .expect("Failed to create UNPACKS_TOTAL metric - this should never happen")
});

static UNPACK_CACHE_HITS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "catalogd_unpack_cache_hits_total",
        "Total number of unpacks served from the local cache",
    )
    .expect("Failed to create UNPACK_CACHE_HITS_TOTAL metric - this should never happen")
});

static STORAGE_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "catalogd_storage_operations_total",
            "Total number of content store operations by operation and result",
        ),
        &["operation", "result"],
    )
    .expect("Failed to create STORAGE_OPERATIONS_TOTAL metric - this should never happen")
});

static GARBAGE_COLLECTED_ENTRIES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "catalogd_garbage_collected_entries_total",
        "Total number of cache entries removed by garbage collection",
    )
    .expect("Failed to create GARBAGE_COLLECTED_ENTRIES_TOTAL metric - this should never happen")
});

static HTTP_REQUEST_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "catalogd_http_request_duration_seconds",
            "Duration of catalog server requests in seconds by status code",
        )
        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
        &["code"],
    )
    .expect("Failed to create HTTP_REQUEST_DURATION metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(UNPACKS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UNPACK_CACHE_HITS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORAGE_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(GARBAGE_COLLECTED_ENTRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(HTTP_REQUEST_DURATION.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

/// `kind` is `recoverable` or `unrecoverable`
pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_unpacks(result: &str) {
    UNPACKS_TOTAL.with_label_values(&[result]).inc();
}

pub fn increment_unpack_cache_hits() {
    UNPACK_CACHE_HITS_TOTAL.inc();
}

pub fn increment_storage_operations(operation: &str, result: &str) {
    STORAGE_OPERATIONS_TOTAL
        .with_label_values(&[operation, result])
        .inc();
}

pub fn increment_garbage_collected_entries() {
    GARBAGE_COLLECTED_ENTRIES_TOTAL.inc();
}

pub fn observe_http_request_duration(code: u16, duration: f64) {
    HTTP_REQUEST_DURATION
        .with_label_values(&[code.to_string().as_str()])
        .observe(duration);
}
