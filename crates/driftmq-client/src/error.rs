//! Client error types.

use std::{io, time::Duration};

use driftmq_proto::{ProtocolError, payloads::ErrorCode};
use thiserror::Error;

/// Failure on a single connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Transport could not be established
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    /// Peer closed the stream, or the connection was closed locally
    #[error("connection closed")]
    Closed,

    /// Nothing was received from the broker for too long
    #[error("no traffic from broker for {0:?}")]
    IdleTimeout(Duration),

    /// Framing or payload failure
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Broker refused the connect greeting
    #[error("handshake rejected: {0}")]
    Rejected(String),

    /// Reply did not match the request
    #[error("unexpected reply type 0x{0:02X}")]
    UnexpectedReply(u8),
}

/// Failure to obtain a pooled connection.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every attempt failed
    #[error("no connection available after {attempts} attempts: {last_error}")]
    NoConnectionAvailable {
        /// Attempts made, initial one included
        attempts: u32,
        /// Why the final attempt failed
        last_error: String,
    },

    /// Pool has been closed
    #[error("connection pool is closed")]
    Closed,
}

/// Failure of a high-level client call.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No connection could be obtained
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The connection failed mid-request
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Broker answered with an error reply
    #[error("broker error {code:?}: {message}")]
    Server {
        /// Failure category
        code: ErrorCode,
        /// Broker's description
        message: String,
    },
}
