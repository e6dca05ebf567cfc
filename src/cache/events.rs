//! Tagged query writes.
//!
//! The host cache reports every write as a `QueryWrite` pushed onto a FIFO
//! `WriteQueue`. Writes carry their origin, so write-backs issued by the
//! propagator are structurally distinguishable from external writes and are
//! never ingested as a new source of truth.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::gauge;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::trace;
use uuid::Uuid;

use super::keys::QueryKey;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::events";
const METRIC_WRITE_QUEUE_LEN: &str = "querynorm_write_queue_len";

/// Monotonic epoch for ordering writes within this process.
pub type Epoch = u64;

/// Who issued a write to the host cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOrigin {
    /// Application code or the network layer: ingest and propagate.
    External,
    /// A propagation write-back: refresh the reference index only.
    Propagator,
}

impl WriteOrigin {
    pub fn is_internal(self) -> bool {
        matches!(self, Self::Propagator)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::External => "external",
            Self::Propagator => "propagator",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteKind {
    /// The query now holds this value.
    Updated(Value),
    /// The query was dropped from the host cache.
    Removed,
}

/// One write observed on the host cache.
#[derive(Debug, Clone)]
pub struct QueryWrite {
    /// Unique identifier for log correlation.
    pub id: Uuid,
    pub epoch: Epoch,
    pub query_key: QueryKey,
    pub kind: WriteKind,
    pub origin: WriteOrigin,
    pub timestamp: OffsetDateTime,
}

impl QueryWrite {
    pub fn new(query_key: QueryKey, kind: WriteKind, origin: WriteOrigin, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            query_key,
            kind,
            origin,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// FIFO queue of host writes awaiting normalization.
///
/// The host pushes from inside its write path; the normalizer drains in
/// order, so one write is fully processed before the next is looked at.
pub struct WriteQueue {
    queue: Mutex<VecDeque<QueryWrite>>,
    epoch_counter: AtomicU64,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn publish(&self, query_key: QueryKey, kind: WriteKind, origin: WriteOrigin) {
        let write = QueryWrite::new(query_key, kind, origin, self.next_epoch());

        trace!(
            write_id = %write.id,
            epoch = write.epoch,
            query_key = %write.query_key,
            origin = write.origin.as_str(),
            "Query write enqueued"
        );

        let mut queue = mutex_lock(&self.queue, SOURCE, "publish");
        queue.push_back(write);
        gauge!(METRIC_WRITE_QUEUE_LEN).set(queue.len() as f64);
    }

    /// Drain up to `limit` writes in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<QueryWrite> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        let drained = queue.drain(..count).collect();
        gauge!(METRIC_WRITE_QUEUE_LEN).set(queue.len() as f64);
        drained
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
    }
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new()
    }
}
