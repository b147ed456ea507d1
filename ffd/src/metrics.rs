//! Prometheus metrics for the daemon.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Flag evaluations by decision source.
    pub static ref EVALUATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ffd_evaluations_total", "Flag evaluations by decision source"),
        &["source"],
    )
    .expect("metric definition");

    /// Admin mutations by operation.
    pub static ref ADMIN_OPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ffd_admin_ops_total", "Admin operations by kind and outcome"),
        &["op", "outcome"],
    )
    .expect("metric definition");

    /// Evaluation-log records dropped because the queue was full.
    pub static ref EVAL_LOG_DROPPED: IntGauge = IntGauge::new(
        "ffd_eval_log_dropped_total",
        "Evaluation log records dropped due to a full queue",
    )
    .expect("metric definition");
}

/// Register all metrics with the daemon registry. Idempotent enough for
/// tests: duplicate registration errors are returned, not panicked on.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(EVALUATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ADMIN_OPS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(EVAL_LOG_DROPPED.clone()))?;
    Ok(())
}

/// Encode all registered metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Record the outcome of one admin operation.
pub fn record_admin_op(op: &str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    ADMIN_OPS_TOTAL.with_label_values(&[op, outcome]).inc();
}
