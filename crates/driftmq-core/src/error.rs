//! Handler and dispatch error types.

use driftmq_proto::{Payload, ProtocolError, payloads::ErrorCode};
use thiserror::Error;

/// Failure reported by a [`crate::FrameHandler`].
///
/// Handler errors never close the connection; they are turned into an
/// `Error` reply for the request that caused them.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Request was well-framed but semantically invalid
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Request named a queue or message that does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage layer failed the operation
    #[error("store failure: {0}")]
    Store(String),

    /// Anything else, including handler panics
    #[error("internal error: {0}")]
    Internal(String),

    /// Body could not be decoded or the reply could not be encoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl HandlerError {
    /// Wire error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::BadRequest(_) | Self::Protocol(_) => ErrorCode::BadRequest,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Store(_) => ErrorCode::StoreFailure,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }
}

/// Dispatch failure for one inbound frame.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No handler is registered for this message type byte
    #[error("no handler for message type 0x{0:02X}")]
    Unhandled(u8),

    /// The registered handler failed
    #[error("handler for message type 0x{message_type:02X} failed: {source}")]
    Handler {
        /// Raw message type of the request
        message_type: u8,
        /// Underlying handler failure
        #[source]
        source: HandlerError,
    },
}

impl DispatchError {
    /// `Error` payload sent back to the peer in place of a normal reply.
    pub fn error_reply(&self) -> Payload {
        match self {
            Self::Unhandled(_) => Payload::error(ErrorCode::UnknownMessageType, self.to_string()),
            Self::Handler { source, .. } => Payload::error(source.code(), source.to_string()),
        }
    }
}
