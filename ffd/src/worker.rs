//! Evaluation-log drain worker.
//!
//! Consumes the bounded queue the resolution path writes into and turns each
//! record into a structured log line plus metrics. Runs detached; resolution
//! never waits on it.

use std::sync::{Arc, Weak};

use ffd_common::QueueSink;
use ffd_common::evallog::EvalRecord;
use tokio::sync::mpsc;
use tracing::info;

use crate::metrics;

/// Spawn the drain task. Holds only a weak handle to the sink (the sink owns
/// the channel's sender), so the task exits once the sink is dropped and the
/// queue drains.
pub fn spawn_eval_log_worker(
    mut rx: mpsc::Receiver<EvalRecord>,
    sink: Weak<QueueSink>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            info!(
                target: "ffd::evallog",
                tenant = %record.tenant_id,
                flag = %record.flag_key,
                enabled = record.enabled,
                source = record.source.as_str(),
                timestamp = %record.timestamp.to_rfc3339(),
                "flag check"
            );
            metrics::EVALUATIONS_TOTAL
                .with_label_values(&[record.source.as_str()])
                .inc();
            if let Some(sink) = sink.upgrade() {
                metrics::EVAL_LOG_DROPPED.set(sink.dropped() as i64);
            }
        }
    })
}

/// Convenience for the common spawn-with-arc case.
pub fn spawn_for(sink: &Arc<QueueSink>, rx: mpsc::Receiver<EvalRecord>) -> tokio::task::JoinHandle<()> {
    spawn_eval_log_worker(rx, Arc::downgrade(sink))
}
