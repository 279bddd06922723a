//! Store error types.

use std::{
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;

/// Convenient result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the message store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Base directory could not be created; the store does not start
    #[error("cannot create store directory {path}: {source}")]
    BaseDir {
        /// Directory that failed
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: io::Error,
    },

    /// Queue names become directory names and must be path-safe
    #[error("invalid queue name {0:?}")]
    InvalidQueueName(String),

    /// Message rejected before anything was buffered
    #[error("invalid message {message_id:?} for queue {queue}: {reason}")]
    InvalidMessage {
        /// Target queue
        queue: String,
        /// Offending message id
        message_id: String,
        /// What is wrong with it
        reason: &'static str,
    },

    /// Delete named a queue or message id with no live record
    #[error("no live message {message_id:?} in queue {queue}")]
    MessageNotFound {
        /// Target queue
        queue: String,
        /// Requested message id
        message_id: String,
    },

    /// File operation failed
    #[error("I/O error on {} (queue {queue}): {source}", path.display())]
    Io {
        /// Queue the file belongs to
        queue: String,
        /// File or directory involved
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: io::Error,
    },

    /// Background thread could not be started
    #[error("cannot start {name} thread: {source}")]
    Spawn {
        /// Thread name
        name: &'static str,
        /// Underlying failure
        #[source]
        source: io::Error,
    },

    /// Store has been closed
    #[error("store is closed")]
    Closed,
}

/// Attach queue and path context to an [`io::Error`].
pub(crate) trait IoContext<T> {
    fn with_path(self, queue: &str, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn with_path(self, queue: &str, path: &Path) -> Result<T> {
        self.map_err(|source| StoreError::Io {
            queue: queue.to_owned(),
            path: path.to_path_buf(),
            source,
        })
    }
}
