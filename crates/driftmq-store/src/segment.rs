//! Segment files.
//!
//! A segment is one append-only file of records named
//! `<queue>-<YYYYMMDD>-<HHMMSS>-<seq>.log`. The timestamp is the local
//! creation time and drives retention; the sequence number orders segments
//! without consulting filesystem metadata.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use bytes::Bytes;
use chrono::{Local, NaiveDateTime};
use tracing::warn;

use crate::{
    error::{IoContext, Result},
    record::{self, Scan},
};

const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Build a segment file name.
pub(crate) fn file_name(queue: &str, created: NaiveDateTime, seq: u64) -> String {
    format!("{queue}-{}-{seq}.log", created.format(STAMP_FORMAT))
}

/// Parse a segment file name belonging to `queue`.
pub(crate) fn parse_name(queue: &str, name: &str) -> Option<(NaiveDateTime, u64)> {
    let rest = name.strip_prefix(queue)?.strip_prefix('-')?.strip_suffix(".log")?;
    let (stamp, seq) = rest.rsplit_once('-')?;
    let created = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()?;
    Some((created, seq.parse().ok()?))
}

/// A segment found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SegmentFile {
    pub seq: u64,
    pub created: NaiveDateTime,
    pub path: PathBuf,
}

/// Segments of `queue` in `dir`, ordered by sequence number.
///
/// Files that do not follow the naming scheme are ignored.
pub(crate) fn list(queue: &str, dir: &Path) -> Result<Vec<SegmentFile>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir).with_path(queue, dir)? {
        let entry = entry.with_path(queue, dir)?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if let Some((created, seq)) = parse_name(queue, &name) {
            segments.push(SegmentFile { seq, created, path: entry.path() });
        }
    }
    segments.sort_by_key(|s| s.seq);
    Ok(segments)
}

/// Read and validate a record file without modifying it.
pub(crate) fn read(queue: &str, path: &Path) -> Result<Scan> {
    let data = Bytes::from(fs::read(path).with_path(queue, path)?);
    Ok(record::scan(&data))
}

/// Read and validate a record file, cutting it back to its valid prefix
/// if a torn or corrupt record is found.
pub(crate) fn repair(queue: &str, path: &Path) -> Result<Scan> {
    let scan = read(queue, path)?;

    if let Some(reason) = scan.torn {
        warn!(
            queue,
            path = %path.display(),
            valid_len = scan.valid_len,
            reason,
            "truncating torn segment"
        );
        let file = OpenOptions::new().write(true).open(path).with_path(queue, path)?;
        file.set_len(scan.valid_len as u64).with_path(queue, path)?;
        file.sync_all().with_path(queue, path)?;
    }

    Ok(scan)
}

/// The segment currently receiving appends.
#[derive(Debug)]
pub(crate) struct ActiveSegment {
    file: File,
    path: PathBuf,
    seq: u64,
    len: u64,
    opened: Instant,
}

impl ActiveSegment {
    /// Create a new, empty segment.
    pub fn create(queue: &str, dir: &Path, seq: u64) -> Result<Self> {
        let path = dir.join(file_name(queue, Local::now().naive_local(), seq));
        let file =
            OpenOptions::new().create_new(true).append(true).open(&path).with_path(queue, &path)?;

        Ok(Self { file, path, seq, len: 0, opened: Instant::now() })
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the segment has outgrown its size or age budget.
    pub fn should_roll(&self, max_bytes: u64, max_age: Duration) -> bool {
        self.len >= max_bytes || (self.len > 0 && self.opened.elapsed() >= max_age)
    }

    /// Append `bytes` and fsync.
    ///
    /// On failure the file is cut back to its previous length so a retry
    /// never lands behind a partial record.
    pub fn append_durable(&mut self, bytes: &[u8]) -> io::Result<()> {
        let result = self.file.write_all(bytes).and_then(|()| self.file.sync_data());
        match result {
            Ok(()) => {
                self.len += bytes.len() as u64;
                Ok(())
            },
            Err(e) => {
                if let Err(truncate) = self.file.set_len(self.len) {
                    warn!(
                        path = %self.path.display(),
                        len = self.len,
                        error = %truncate,
                        "cannot cut segment back after failed append"
                    );
                }
                Err(e)
            },
        }
    }

    /// Flush file metadata before the handle is dropped.
    pub fn seal(self) -> io::Result<()> {
        self.file.sync_all()
    }
}
