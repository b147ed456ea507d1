//! Best-effort evaluation logging.
//!
//! Flags with `log_checks` set emit one record per resolution. The sink must
//! never block, delay, or fail the resolution call, so the channel-backed
//! implementation uses `try_send` and drops the newest record when the queue
//! is full. Drops are counted for the metrics endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use crate::types::{DecisionSource, FlagKey, TenantId};

/// One evaluation-log record.
#[derive(Debug, Clone, Serialize)]
pub struct EvalRecord {
    pub tenant_id: TenantId,
    pub flag_key: FlagKey,
    pub enabled: bool,
    pub source: DecisionSource,
    pub timestamp: DateTime<Utc>,
}

/// Destination for evaluation records. Implementations must be non-blocking.
pub trait EvalSink: Send + Sync {
    fn record(&self, record: EvalRecord);
}

/// Sink that discards everything; for engines with logging disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EvalSink for NullSink {
    fn record(&self, _record: EvalRecord) {}
}

/// Bounded-channel sink drained by a detached worker.
pub struct QueueSink {
    tx: mpsc::Sender<EvalRecord>,
    dropped: AtomicU64,
}

impl QueueSink {
    /// Create a sink with the given queue capacity, returning the receiver
    /// side for the drain worker.
    pub fn bounded(capacity: usize) -> (Arc<Self>, mpsc::Receiver<EvalRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Arc::new(Self {
                tx,
                dropped: AtomicU64::new(0),
            }),
            rx,
        )
    }

    /// Number of records dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EvalSink for QueueSink {
    fn record(&self, record: EvalRecord) {
        if let Err(err) = self.tx.try_send(record) {
            // Drop-newest: evaluation latency wins over log completeness.
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("eval log record dropped: {err}");
        }
    }
}
