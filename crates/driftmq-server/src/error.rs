//! Server error types.

use std::io;

use driftmq_proto::ProtocolError;
use driftmq_store::StoreError;
use thiserror::Error;

/// Errors that end the accept loop or a single connection.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Listener could not be bound
    #[error("cannot bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: String,
        /// Underlying failure
        #[source]
        source: io::Error,
    },

    /// TLS handshake with a client failed
    #[error("TLS handshake failed: {0}")]
    Tls(#[source] io::Error),

    /// Framing or transport failure on a connection
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Store could not be opened or closed
    #[error(transparent)]
    Store(#[from] StoreError),
}
