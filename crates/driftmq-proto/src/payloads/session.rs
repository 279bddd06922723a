//! Session payloads: connection greeting and failures.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Client greeting, sent once after the transport is established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// Caller-chosen client identifier
    pub client_id: String,
    /// Role hint, e.g. `PRODUCER` or `CONSUMER`
    pub client_type: String,
    /// Client library version
    pub client_version: String,
}

/// Broker reply to a [`ConnectRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResponse {
    /// Whether the broker accepted the connection
    pub success: bool,
    /// Human-readable status
    pub message: String,
    /// Identifier of the answering broker
    pub server_id: String,
}

/// Failure reply for any request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Failure category
    pub code: ErrorCode,
    /// Description for logs and callers
    pub message: String,
}

/// Failure categories carried in [`ErrorReply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u16)]
pub enum ErrorCode {
    /// Body could not be decoded or failed validation
    BadRequest = 1,
    /// No handler is registered for the message type
    UnknownMessageType = 2,
    /// The store rejected or failed the operation
    StoreFailure = 3,
    /// Unexpected broker-side failure
    Internal = 4,
    /// The queue or message does not exist
    NotFound = 5,
}
