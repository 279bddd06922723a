//! Durable message store for the driftmq broker.
//!
//! Each queue is an append-only log kept twice: a write-ahead log that is
//! synced first and a data log that readers replay. Writes are buffered per
//! queue and flushed in batches.
//!
//! # Layout
//!
//! ```text
//! <base_dir>/<queue>/wal/<queue>-<YYYYMMDD>-<HHMMSS>-<seq>.log
//! <base_dir>/<queue>/data/<queue>-<YYYYMMDD>-<HHMMSS>-<seq>.log
//! <base_dir>/<queue>/tombstones.log
//! ```
//!
//! # Components
//!
//! - [`MessageStore`]: save, flush, load, delete, recovery and retention
//! - [`StoreConfig`]: thresholds, segment budgets and schedule
//! - [`record`]: the checksummed on-disk record format

mod config;
mod engine;
mod error;
mod queue;
pub mod record;
mod scheduler;
mod segment;

use bytes::Bytes;
pub use config::StoreConfig;
pub use engine::{MAX_QUEUE_NAME_LEN, MessageStore};
pub use error::{Result, StoreError};

/// A flushed message read back from the data log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Offset assigned when the message was saved
    pub offset: u64,
    /// Caller-supplied message id
    pub message_id: String,
    /// Message body, byte-identical to what was saved
    pub payload: Bytes,
}

/// Outcome of recovering one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueRecovery {
    /// Queue name
    pub queue: String,
    /// Next offset the queue will assign
    pub next_offset: u64,
    /// Records in the data log after recovery
    pub records: usize,
    /// Records copied from the WAL into the data log
    pub replayed_from_wal: usize,
    /// Files that were cut back to their last whole record
    pub torn_segments: usize,
}

/// Outcome of [`MessageStore::recover`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Per-queue reports, ordered by queue name
    pub queues: Vec<QueueRecovery>,
}

impl RecoveryResult {
    /// Report for one queue.
    pub fn queue(&self, name: &str) -> Option<&QueueRecovery> {
        self.queues.iter().find(|q| q.queue == name)
    }
}

/// Outcome of a retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Sealed data segments removed
    pub data_segments_removed: usize,
    /// Sealed WAL segments removed
    pub wal_segments_removed: usize,
}
