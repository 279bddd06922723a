//! Per-queue store context.
//!
//! Each queue owns its directory tree, a write buffer, its active segments
//! and one mutex serialising buffer append, offset assignment and flush.
//! The next offset is mirrored in an atomic so readers never take the lock.
//!
//! Besides the segment directories a queue keeps two small files:
//! `tombstones.log`, one record per deleted offset, and `watermarks.log`, the
//! offset high-water mark and consumer commit. The watermarks keep offsets
//! monotonic even after retention has removed the segments that held them.

use std::{
    collections::HashSet,
    fs::{self, File, OpenOptions},
    io::Write,
    ops::Range,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::{BufMut, BytesMut};
use chrono::{NaiveDateTime, TimeDelta};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    CleanupReport, QueueRecovery, StoredMessage,
    config::StoreConfig,
    error::{IoContext, Result},
    record,
    segment::{self, ActiveSegment},
};

const WAL_DIR: &str = "wal";
const DATA_DIR: &str = "data";
const TOMBSTONE_FILE: &str = "tombstones.log";
const WATERMARK_FILE: &str = "watermarks.log";
const WATERMARK_TMP: &str = "watermarks.tmp";

/// Persisted offset bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Watermarks {
    next_offset: u64,
    committed: Option<u64>,
}

/// Store state for one queue.
#[derive(Debug)]
pub(crate) struct QueueContext {
    name: String,
    wal_dir: PathBuf,
    data_dir: PathBuf,
    tombstone_path: PathBuf,
    watermark_path: PathBuf,
    next_offset: AtomicU64,
    state: Mutex<QueueState>,
}

#[derive(Debug, Default)]
struct QueueState {
    buffer: BytesMut,
    pending: usize,
    /// Buffer is already durable in the WAL; only the data write is pending
    in_wal: bool,
    wal: Option<ActiveSegment>,
    data: Option<ActiveSegment>,
    next_wal_seq: u64,
    next_data_seq: u64,
    /// Every offset below this is in the data log
    durable_offset: u64,
    committed: Option<u64>,
    /// Deleted offsets
    tombstones: HashSet<u64>,
    tombstone_count: u64,
    tombstone_file: Option<File>,
}

impl QueueContext {
    /// Create the directories for a queue seen for the first time.
    pub fn create(base_dir: &Path, name: &str) -> Result<Self> {
        let dir = base_dir.join(name);
        let wal_dir = dir.join(WAL_DIR);
        let data_dir = dir.join(DATA_DIR);
        fs::create_dir_all(&wal_dir).with_path(name, &wal_dir)?;
        fs::create_dir_all(&data_dir).with_path(name, &data_dir)?;

        Ok(Self {
            name: name.to_owned(),
            wal_dir,
            data_dir,
            tombstone_path: dir.join(TOMBSTONE_FILE),
            watermark_path: dir.join(WATERMARK_FILE),
            next_offset: AtomicU64::new(0),
            state: Mutex::new(QueueState {
                next_wal_seq: 1,
                next_data_seq: 1,
                ..QueueState::default()
            }),
        })
    }

    /// Rebuild a queue from its files.
    ///
    /// Torn segments are cut back to their last whole record. WAL records
    /// beyond the data log's high-water mark are appended to a fresh data
    /// segment so the data log is complete before the queue takes writes.
    pub fn recover(base_dir: &Path, name: &str) -> Result<(Self, QueueRecovery)> {
        let ctx = Self::create(base_dir, name)?;
        let mut report = QueueRecovery { queue: name.to_owned(), ..QueueRecovery::default() };
        let mut state = QueueState::default();

        let mut data_high: Option<u64> = None;
        let data_segments = segment::list(name, &ctx.data_dir)?;
        for seg in &data_segments {
            let scan = segment::repair(name, &seg.path)?;
            report.torn_segments += usize::from(scan.torn.is_some());
            for rec in scan.records {
                if data_high.is_none_or(|high| rec.offset > high) {
                    data_high = Some(rec.offset);
                    report.records += 1;
                }
            }
        }
        state.next_data_seq = data_segments.last().map_or(1, |s| s.seq + 1);

        let mut replay = BytesMut::new();
        let mut high = data_high;
        let wal_segments = segment::list(name, &ctx.wal_dir)?;
        for seg in &wal_segments {
            let scan = segment::repair(name, &seg.path)?;
            report.torn_segments += usize::from(scan.torn.is_some());
            for rec in scan.records {
                if high.is_none_or(|h| rec.offset > h) {
                    record::encode(rec.offset, &rec.body, &mut replay);
                    high = Some(rec.offset);
                    report.replayed_from_wal += 1;
                }
            }
        }
        state.next_wal_seq = wal_segments.last().map_or(1, |s| s.seq + 1);

        if !replay.is_empty() {
            let mut seg = ActiveSegment::create(name, &ctx.data_dir, state.next_data_seq)?;
            seg.append_durable(&replay).with_path(name, seg.path())?;
            state.next_data_seq += 1;
            state.data = Some(seg);
            report.records += report.replayed_from_wal;
            info!(queue = name, replayed = report.replayed_from_wal, "replayed WAL into data log");
        }

        if ctx.tombstone_path.exists() {
            let scan = segment::repair(name, &ctx.tombstone_path)?;
            report.torn_segments += usize::from(scan.torn.is_some());
            state.tombstone_count = scan.records.last().map_or(0, |r| r.offset + 1);
            state.tombstones =
                scan.records.iter().filter_map(|r| tombstone_target(&r.body)).collect();
        }

        let marks = read_watermarks(name, &ctx.watermark_path)?;
        if let Some(marks) = marks {
            state.committed = marks.committed;
        }

        let found = high.map_or(0, |h| h + 1);
        let next = found.max(marks.map_or(0, |m| m.next_offset));
        if next > found {
            debug!(queue = name, found, next, "high-water mark is ahead of surviving segments");
        }
        state.durable_offset = next;
        report.next_offset = next;
        ctx.next_offset.store(next, Ordering::Release);
        *ctx.state.lock() = state;

        Ok((ctx, report))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next offset to be assigned.
    pub fn next_offset(&self) -> u64 {
        self.next_offset.load(Ordering::Acquire)
    }

    /// Buffer encoded message bodies with consecutive offsets.
    ///
    /// Flushes synchronously when the buffer crosses either threshold. A
    /// failed threshold flush leaves the records buffered for the scheduler
    /// and does not fail the append.
    pub fn append(&self, bodies: &[BytesMut], config: &StoreConfig) -> Range<u64> {
        let mut state = self.state.lock();
        let first = self.next_offset.load(Ordering::Acquire);

        for (offset, body) in (first..).zip(bodies) {
            record::encode(offset, body, &mut state.buffer);
        }
        state.pending += bodies.len();
        let end = first + bodies.len() as u64;
        self.next_offset.store(end, Ordering::Release);

        if state.pending >= config.flush_threshold_messages
            || state.buffer.len() >= config.flush_threshold_bytes
        {
            debug!(queue = %self.name, pending = state.pending, "flush threshold reached");
            if let Err(e) = self.flush_locked(&mut state, config) {
                warn!(queue = %self.name, error = %e, "threshold flush failed, will retry");
            }
        }

        first..end
    }

    /// Make every buffered record durable in the WAL and then the data log.
    pub fn flush(&self, config: &StoreConfig) -> Result<()> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state, config)
    }

    fn flush_locked(&self, state: &mut QueueState, config: &StoreConfig) -> Result<()> {
        if state.buffer.is_empty() {
            return Ok(());
        }

        if !state.in_wal {
            let mut wal = Self::writable(
                &self.name,
                &self.wal_dir,
                &mut state.wal,
                &mut state.next_wal_seq,
                config,
            )?;
            wal.append_durable(&state.buffer).with_path(&self.name, wal.path())?;
            state.wal = Some(wal);
            state.in_wal = true;
        }

        let mut data = Self::writable(
            &self.name,
            &self.data_dir,
            &mut state.data,
            &mut state.next_data_seq,
            config,
        )?;
        data.append_durable(&state.buffer).with_path(&self.name, data.path())?;
        state.data = Some(data);

        debug!(queue = %self.name, records = state.pending, bytes = state.buffer.len(), "flushed");
        state.durable_offset = self.next_offset.load(Ordering::Acquire);
        state.buffer.clear();
        state.pending = 0;
        state.in_wal = false;
        Ok(())
    }

    /// Take the active segment out of `slot`, rolling it first if it is over
    /// budget or opening one if there is none.
    fn writable(
        queue: &str,
        dir: &Path,
        slot: &mut Option<ActiveSegment>,
        next_seq: &mut u64,
        config: &StoreConfig,
    ) -> Result<ActiveSegment> {
        if let Some(seg) = slot.take() {
            if !seg.should_roll(config.segment_max_bytes, config.segment_max_age) {
                return Ok(seg);
            }
            debug!(queue, seq = seg.seq(), "rolling segment");
            let path = seg.path().to_path_buf();
            seg.seal().with_path(queue, &path)?;
        }

        let seg = ActiveSegment::create(queue, dir, *next_seq)?;
        *next_seq += 1;
        Ok(seg)
    }

    /// Durably tombstone every live record carrying `message_id`.
    ///
    /// Buffered records are flushed first so they can be matched. Returns how
    /// many records were deleted; a later message reusing the id is not
    /// affected.
    pub fn delete(&self, message_id: &str, config: &StoreConfig) -> Result<usize> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state, config)?;

        let targets: Vec<u64> = self
            .scan_data()?
            .into_iter()
            .filter(|m| m.message_id == message_id && !state.tombstones.contains(&m.offset))
            .map(|m| m.offset)
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }

        let mut buf = BytesMut::new();
        for (seq, &target) in (state.tombstone_count..).zip(&targets) {
            let mut body = BytesMut::with_capacity(8 + message_id.len());
            body.put_u64(target);
            body.put_slice(message_id.as_bytes());
            record::encode(seq, &body, &mut buf);
        }

        let path = &self.tombstone_path;
        let mut file = match state.tombstone_file.take() {
            Some(file) => file,
            None => OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_path(&self.name, path)?,
        };
        file.write_all(&buf).and_then(|()| file.sync_data()).with_path(&self.name, path)?;
        state.tombstone_file = Some(file);

        state.tombstone_count += targets.len() as u64;
        debug!(queue = %self.name, message_id, offsets = ?targets, "tombstoned");
        state.tombstones.extend(targets.iter().copied());
        Ok(targets.len())
    }

    /// Flushed, non-deleted messages in offset order.
    pub fn load(&self) -> Result<Vec<StoredMessage>> {
        let state = self.state.lock();
        let mut messages = self.scan_data()?;
        messages.retain(|m| !state.tombstones.contains(&m.offset));
        Ok(messages)
    }

    /// Every decodable record in the data log, each offset once. Callers hold
    /// the state lock.
    fn scan_data(&self) -> Result<Vec<StoredMessage>> {
        let mut out = Vec::new();
        let mut high: Option<u64> = None;

        for seg in segment::list(&self.name, &self.data_dir)? {
            let scan = segment::read(&self.name, &seg.path)?;
            for rec in scan.records {
                if high.is_some_and(|h| rec.offset <= h) {
                    continue;
                }
                high = Some(rec.offset);

                let Some((message_id, payload)) = record::decode_message(&rec.body) else {
                    warn!(queue = %self.name, offset = rec.offset, "undecodable message body");
                    continue;
                };
                out.push(StoredMessage { offset: rec.offset, message_id, payload });
            }
        }

        Ok(out)
    }

    /// Record the consumer watermark: every offset below `offset` is consumed.
    ///
    /// The watermark only moves forward and is persisted before it takes
    /// effect.
    pub fn commit(&self, offset: u64) -> Result<()> {
        let mut state = self.state.lock();
        if state.committed.is_some_and(|c| c >= offset) {
            return Ok(());
        }

        self.write_watermarks(Watermarks {
            next_offset: state.durable_offset,
            committed: Some(offset),
        })?;
        state.committed = Some(offset);
        Ok(())
    }

    /// Replace the watermark file atomically.
    fn write_watermarks(&self, marks: Watermarks) -> Result<()> {
        let mut buf = BytesMut::new();
        let committed = marks.committed.map(u64::to_be_bytes);
        let body = committed.as_ref().map_or(&[][..], |c| &c[..]);
        record::encode(marks.next_offset, body, &mut buf);

        let tmp = self.watermark_path.with_file_name(WATERMARK_TMP);
        let mut file = File::create(&tmp).with_path(&self.name, &tmp)?;
        file.write_all(&buf).and_then(|()| file.sync_all()).with_path(&self.name, &tmp)?;
        fs::rename(&tmp, &self.watermark_path).with_path(&self.name, &self.watermark_path)?;
        Ok(())
    }

    /// Delete sealed segments that are no longer needed.
    ///
    /// The newest segment of each log is always kept: it is either active or
    /// will be again after a restart. The high-water mark is persisted before
    /// anything is removed.
    pub fn cleanup(&self, retention: TimeDelta, now: NaiveDateTime) -> Result<CleanupReport> {
        let state = self.state.lock();
        let mut report = CleanupReport::default();

        let data_segments = segment::list(&self.name, &self.data_dir)?;
        let wal_segments = segment::list(&self.name, &self.wal_dir)?;
        let newest_data = data_segments.last().map(|s| s.seq);
        let newest_wal = wal_segments.last().map(|s| s.seq);

        self.write_watermarks(Watermarks {
            next_offset: state.durable_offset,
            committed: state.committed,
        })?;

        for seg in data_segments {
            let expired = seg.created.checked_add_signed(retention).is_some_and(|at| at <= now);
            if Some(seg.seq) == newest_data || !expired {
                continue;
            }
            if let Some(committed) = state.committed {
                let last = segment::read(&self.name, &seg.path)?.records.last().map(|r| r.offset);
                if last.is_some_and(|last| last >= committed) {
                    continue;
                }
            }
            remove(&self.name, &seg.path)?;
            report.data_segments_removed += 1;
        }

        for seg in wal_segments {
            if Some(seg.seq) == newest_wal {
                continue;
            }
            let last = segment::read(&self.name, &seg.path)?.records.last().map(|r| r.offset);
            if last.is_none_or(|last| last < state.durable_offset) {
                remove(&self.name, &seg.path)?;
                report.wal_segments_removed += 1;
            }
        }

        Ok(report)
    }

    /// Flush and release every file handle.
    pub fn close(&self, config: &StoreConfig) -> Result<()> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state, config)?;
        self.write_watermarks(Watermarks {
            next_offset: state.durable_offset,
            committed: state.committed,
        })?;

        for seg in [state.wal.take(), state.data.take()].into_iter().flatten() {
            let path = seg.path().to_path_buf();
            seg.seal().with_path(&self.name, &path)?;
        }
        if let Some(file) = state.tombstone_file.take() {
            file.sync_all().with_path(&self.name, &self.tombstone_path)?;
        }
        Ok(())
    }
}

/// Offset a tombstone record deletes: the first eight bytes of its body.
fn tombstone_target(body: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = body.get(..8)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

fn read_watermarks(queue: &str, path: &Path) -> Result<Option<Watermarks>> {
    if !path.exists() {
        return Ok(None);
    }

    let scan = segment::read(queue, path)?;
    if let Some(reason) = scan.torn {
        warn!(queue, path = %path.display(), reason, "ignoring damaged watermark file");
    }
    Ok(scan.records.last().map(|rec| Watermarks {
        next_offset: rec.offset,
        committed: rec.body.get(..8).and_then(|b| b.try_into().ok()).map(u64::from_be_bytes),
    }))
}

fn remove(queue: &str, path: &Path) -> Result<()> {
    fs::remove_file(path).with_path(queue, path)?;
    info!(queue, path = %path.display(), "removed segment");
    Ok(())
}
