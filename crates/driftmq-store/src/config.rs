//! Store configuration.

use std::{path::PathBuf, time::Duration};

/// Tuning for a [`crate::MessageStore`].
///
/// All fields are explicit; nothing is read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Root directory; each queue gets `<base_dir>/<queue>/`
    pub base_dir: PathBuf,
    /// Period of the background flush
    pub flush_interval: Duration,
    /// Flush a queue synchronously once this many records are buffered
    pub flush_threshold_messages: usize,
    /// Flush a queue synchronously once its buffer reaches this many bytes
    pub flush_threshold_bytes: usize,
    /// Roll a segment once it grows past this size
    pub segment_max_bytes: u64,
    /// Roll a segment once it has been open this long
    pub segment_max_age: Duration,
    /// Sealed data segments older than this are eligible for cleanup
    pub retention: Duration,
    /// Local hour of day (0-23) at which the cleanup sweep runs
    pub cleanup_hour: u32,
}

impl StoreConfig {
    /// Defaults rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            flush_interval: Duration::from_millis(200),
            flush_threshold_messages: 1024,
            flush_threshold_bytes: 4 * 1024 * 1024,
            segment_max_bytes: 64 * 1024 * 1024,
            segment_max_age: Duration::from_secs(60 * 60),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            cleanup_hour: 2,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new("data")
    }
}
