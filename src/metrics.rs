//! Prometheus metrics collection.
//!
//! Tracks record throughput, per-outcome verdicts, per-checker evaluation
//! latency and action failures. Exposed over HTTP by [`crate::http`] when a
//! metrics address is configured.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Outcome label: record banned by the chain.
pub const OUTCOME_BAN: &str = "ban";
/// Outcome label: record cleared by the chain.
pub const OUTCOME_PASS: &str = "pass";
/// Outcome label: record dropped by the pass-cache.
pub const OUTCOME_CACHED_PASS: &str = "cached_pass";
/// Outcome label: record dropped by the block-cache.
pub const OUTCOME_CACHED_BLOCK: &str = "cached_block";

lazy_static! {
    /// Global Prometheus registry for all metrics.
    pub static ref REGISTRY: Registry = Registry::new();

    /// Total log records ingested.
    pub static ref RECORDS_TOTAL: IntCounter = IntCounter::new(
        "logwarden_records_total",
        "Log records ingested"
    ).unwrap();

    /// Per-outcome record verdicts.
    pub static ref VERDICTS: IntCounterVec = IntCounterVec::new(
        Opts::new("logwarden_verdicts_total", "Record verdicts by outcome"),
        &["outcome"]
    ).unwrap();

    /// Wall time spent in each checker.
    pub static ref CHECKER_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "logwarden_checker_duration_seconds",
            "Checker evaluation wall time"
        ),
        &["checker"]
    ).unwrap();

    /// Block actions that failed to spawn or exited non-zero.
    pub static ref ACTION_FAILURES: IntCounter = IntCounter::new(
        "logwarden_action_failures_total",
        "Failed block actions"
    ).unwrap();
}

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at startup before any metrics are recorded.
pub fn init() {
    REGISTRY.register(Box::new(RECORDS_TOTAL.clone())).unwrap();
    REGISTRY.register(Box::new(VERDICTS.clone())).unwrap();
    REGISTRY
        .register(Box::new(CHECKER_DURATION.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(ACTION_FAILURES.clone()))
        .unwrap();
}

/// Record one checker evaluation; wired as the chain's duration observer.
pub fn observe_checker_duration(checker: &str, duration: Duration) {
    CHECKER_DURATION
        .with_label_values(&[checker])
        .observe(duration.as_secs_f64());
}

/// Count one record outcome.
pub fn record_outcome(outcome: &str) {
    VERDICTS.with_label_values(&[outcome]).inc();
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
