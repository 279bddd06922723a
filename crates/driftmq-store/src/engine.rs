//! The store facade.

use std::{
    collections::HashMap,
    fs,
    ops::Range,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
};

use chrono::{Local, TimeDelta};
use driftmq_proto::payloads::MessageItem;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::{
    CleanupReport, RecoveryResult, StoredMessage,
    config::StoreConfig,
    error::{IoContext, Result, StoreError},
    queue::QueueContext,
    record,
    scheduler::{self, Shutdown},
};

/// Longest accepted queue name.
pub const MAX_QUEUE_NAME_LEN: usize = 200;

/// State shared between the store handle and its scheduler threads.
#[derive(Debug)]
pub(crate) struct Shared {
    config: StoreConfig,
    queues: RwLock<HashMap<String, Arc<QueueContext>>>,
    shutdown: Shutdown,
}

impl Shared {
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    fn existing(&self, queue: &str) -> Option<Arc<QueueContext>> {
        self.queues.read().get(queue).cloned()
    }

    fn get_or_create(&self, queue: &str) -> Result<Arc<QueueContext>> {
        if let Some(ctx) = self.existing(queue) {
            return Ok(ctx);
        }

        validate_queue_name(queue)?;
        let mut queues = self.queues.write();
        if let Some(ctx) = queues.get(queue) {
            return Ok(Arc::clone(ctx));
        }
        let ctx = Arc::new(QueueContext::create(&self.config.base_dir, queue)?);
        queues.insert(queue.to_owned(), Arc::clone(&ctx));
        debug!(queue, "created queue");
        Ok(ctx)
    }

    fn snapshot(&self) -> Vec<Arc<QueueContext>> {
        self.queues.read().values().cloned().collect()
    }

    /// Flush every queue, attempting all of them before reporting the first
    /// failure.
    pub fn flush_all(&self) -> Result<()> {
        let mut first_err = None;
        for ctx in self.snapshot() {
            if let Err(e) = ctx.flush(&self.config) {
                warn!(queue = ctx.name(), error = %e, "flush failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn clean_expired(&self) -> Result<CleanupReport> {
        let retention = TimeDelta::from_std(self.config.retention).unwrap_or(TimeDelta::MAX);
        let now = Local::now().naive_local();

        let mut total = CleanupReport::default();
        for ctx in self.snapshot() {
            let report = ctx.cleanup(retention, now)?;
            total.data_segments_removed += report.data_segments_removed;
            total.wal_segments_removed += report.wal_segments_removed;
        }
        Ok(total)
    }
}

/// Durable, per-queue append-only message store.
///
/// Writes are buffered per queue and become durable (and visible to
/// [`MessageStore::load_queue_message`]) once flushed, either by the
/// background scheduler, by a buffer threshold or by an explicit
/// [`MessageStore::flush`].
///
/// # Invariants
///
/// - Offsets within a queue are assigned contiguously from 0 under the
///   queue's lock, so concurrent writers never see gaps or duplicates.
/// - A flush writes the WAL, syncs it, then writes the data log and syncs
///   it; the buffer is only cleared once both succeed.
/// - Active segments are never removed by the retention sweep.
#[derive(Debug)]
pub struct MessageStore {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl MessageStore {
    /// Create the base directory, recover every queue found in it and start
    /// the flush and cleanup schedulers.
    pub fn open(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.base_dir)
            .map_err(|source| StoreError::BaseDir { path: config.base_dir.clone(), source })?;

        let store = Self {
            shared: Arc::new(Shared {
                config,
                queues: RwLock::new(HashMap::new()),
                shutdown: Shutdown::default(),
            }),
            workers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        };

        let recovered = store.recover()?;
        info!(
            base_dir = %store.shared.config.base_dir.display(),
            queues = recovered.queues.len(),
            "message store opened"
        );

        let flush = scheduler::spawn_flush(Arc::clone(&store.shared))?;
        store.workers.lock().push(flush);
        let cleanup = scheduler::spawn_cleanup(Arc::clone(&store.shared))?;
        store.workers.lock().push(cleanup);

        Ok(store)
    }

    /// Configuration the store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) { Err(StoreError::Closed) } else { Ok(()) }
    }

    /// Buffer one message and return its offset.
    pub fn save(&self, queue: &str, message: MessageItem) -> Result<u64> {
        self.batch_save(queue, vec![message]).map(|range| range.start)
    }

    /// Buffer messages with consecutive offsets.
    ///
    /// Every message is validated before anything is buffered, so the batch
    /// is either wholly assigned offsets or rejected.
    pub fn batch_save(&self, queue: &str, messages: Vec<MessageItem>) -> Result<Range<u64>> {
        self.ensure_open()?;
        validate_queue_name(queue)?;

        let mut bodies = Vec::with_capacity(messages.len());
        for message in &messages {
            validate_message(queue, message)?;
            bodies.push(record::encode_message(&message.message_id, &message.body));
        }

        let ctx = self.shared.get_or_create(queue)?;
        Ok(ctx.append(&bodies, &self.shared.config))
    }

    /// Make every buffered message durable.
    pub fn flush(&self) -> Result<()> {
        self.shared.flush_all()
    }

    /// Make one queue's buffered messages durable.
    pub fn flush_queue(&self, queue: &str) -> Result<()> {
        match self.shared.existing(queue) {
            Some(ctx) => ctx.flush(&self.shared.config),
            None => Ok(()),
        }
    }

    /// Durably mark the stored messages carrying `message_id` deleted; they
    /// are skipped by later loads. A message saved later under the same id
    /// stays visible.
    ///
    /// Fails with [`StoreError::MessageNotFound`] when the queue is unknown or
    /// holds no live message with that id.
    pub fn delete(&self, queue: &str, message_id: &str) -> Result<()> {
        self.ensure_open()?;
        validate_queue_name(queue)?;
        validate_message_id(queue, message_id)?;

        let not_found = || StoreError::MessageNotFound {
            queue: queue.to_owned(),
            message_id: message_id.to_owned(),
        };
        let ctx = self.shared.existing(queue).ok_or_else(not_found)?;
        match ctx.delete(message_id, &self.shared.config)? {
            0 => Err(not_found()),
            _ => Ok(()),
        }
    }

    /// Every flushed, non-deleted message of `queue` in offset order.
    pub fn load_queue_message(&self, queue: &str) -> Result<Vec<StoredMessage>> {
        validate_queue_name(queue)?;
        match self.shared.existing(queue) {
            Some(ctx) => ctx.load(),
            None => Ok(Vec::new()),
        }
    }

    /// Rebuild every queue from disk.
    ///
    /// Queues already loaded are flushed first. Torn segments are truncated
    /// and WAL records missing from the data log are replayed.
    pub fn recover(&self) -> Result<RecoveryResult> {
        let mut queues = self.shared.queues.write();
        for ctx in queues.values() {
            ctx.close(&self.shared.config)?;
        }
        queues.clear();

        let base_dir = &self.shared.config.base_dir;
        let mut names = Vec::new();
        for entry in fs::read_dir(base_dir).with_path("", base_dir)? {
            let entry = entry.with_path("", base_dir)?;
            let is_dir = entry.file_type().with_path("", &entry.path())?.is_dir();
            match entry.file_name().to_str() {
                Some(name) if is_dir && validate_queue_name(name).is_ok() => {
                    names.push(name.to_owned());
                },
                _ => debug!(path = %entry.path().display(), "skipping non-queue entry"),
            }
        }
        names.sort();

        let mut result = RecoveryResult::default();
        for name in names {
            let (ctx, report) = QueueContext::recover(base_dir, &name)?;
            if report.torn_segments > 0 {
                warn!(queue = %name, torn = report.torn_segments, "recovered torn segments");
            }
            info!(
                queue = %name,
                next_offset = report.next_offset,
                records = report.records,
                replayed = report.replayed_from_wal,
                "queue recovered"
            );
            queues.insert(name, Arc::new(ctx));
            result.queues.push(report);
        }

        Ok(result)
    }

    /// Remove expired sealed segments now instead of waiting for the
    /// scheduled sweep.
    pub fn clean_expired_files(&self) -> Result<CleanupReport> {
        self.shared.clean_expired()
    }

    /// Record that every offset of `queue` below `offset` has been consumed.
    ///
    /// The watermark is persisted and survives a restart. Unknown queues are
    /// ignored.
    pub fn commit_consumed(&self, queue: &str, offset: u64) -> Result<()> {
        validate_queue_name(queue)?;
        match self.shared.existing(queue) {
            Some(ctx) => ctx.commit(offset),
            None => Ok(()),
        }
    }

    /// Next offset to be assigned in `queue`; 0 for an unknown queue.
    pub fn get_max_offset(&self, queue: &str) -> u64 {
        self.shared.existing(queue).map_or(0, |ctx| ctx.next_offset())
    }

    /// Names of every known queue.
    pub fn queues(&self) -> Vec<String> {
        let mut names: Vec<_> = self.shared.queues.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop the schedulers, flush every queue and release file handles.
    ///
    /// Idempotent. Later writes fail with [`StoreError::Closed`].
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.shared.shutdown.trigger();
        for worker in self.workers.lock().drain(..) {
            if worker.join().is_err() {
                warn!("store worker panicked");
            }
        }

        let mut first_err = None;
        for ctx in self.shared.snapshot() {
            if let Err(e) = ctx.close(&self.shared.config) {
                warn!(queue = ctx.name(), error = %e, "close failed");
                first_err.get_or_insert(e);
            }
        }
        info!("message store closed");
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for MessageStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "error closing message store on drop");
        }
    }
}

fn validate_queue_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_QUEUE_NAME_LEN
        && name != "."
        && name != ".."
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));

    if valid { Ok(()) } else { Err(StoreError::InvalidQueueName(name.to_owned())) }
}

fn validate_message_id(queue: &str, message_id: &str) -> Result<()> {
    let reason = if message_id.is_empty() {
        "empty message id"
    } else if message_id.len() > usize::from(u16::MAX) {
        "message id longer than 65535 bytes"
    } else {
        return Ok(());
    };
    Err(StoreError::InvalidMessage {
        queue: queue.to_owned(),
        message_id: message_id.chars().take(64).collect(),
        reason,
    })
}

fn validate_message(queue: &str, message: &MessageItem) -> Result<()> {
    validate_message_id(queue, &message.message_id)?;

    let body_len = 2 + message.message_id.len() + message.body.len();
    if body_len > u32::MAX as usize {
        return Err(StoreError::InvalidMessage {
            queue: queue.to_owned(),
            message_id: message.message_id.clone(),
            reason: "message larger than 4 GiB",
        });
    }
    Ok(())
}
