//! Queue operation payloads.

use serde::{Deserialize, Serialize};

/// One message handed to the broker for storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageItem {
    /// Producer-assigned identifier, used for deletion
    pub message_id: String,
    /// Opaque message body
    pub body: Vec<u8>,
}

/// Append a batch of messages to a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Produce {
    /// Target queue
    pub queue: String,
    /// Messages, in the order offsets should be assigned
    pub messages: Vec<MessageItem>,
}

/// Offsets assigned to a [`Produce`] batch.
///
/// The batch occupies `first_offset .. first_offset + count`. The broker
/// only acks once the batch has been flushed and fsynced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProduceAck {
    /// Queue the batch was appended to
    pub queue: String,
    /// Offset of the first message
    pub first_offset: u64,
    /// Number of messages appended
    pub count: u64,
}

/// Read all durable messages of a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fetch {
    /// Queue to read
    pub queue: String,
}

/// A stored message as returned to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedMessage {
    /// Queue-local offset
    pub offset: u64,
    /// Producer-assigned identifier
    pub message_id: String,
    /// Message body
    pub body: Vec<u8>,
}

/// Messages returned for a [`Fetch`], in offset order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    /// Queue that was read
    pub queue: String,
    /// Durable, non-deleted messages
    pub messages: Vec<FetchedMessage>,
}

/// Logically delete one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delete {
    /// Queue holding the message
    pub queue: String,
    /// Identifier of the message to delete
    pub message_id: String,
}

/// Confirms that a tombstone for the message is durable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteAck {
    /// Queue holding the message
    pub queue: String,
    /// Identifier of the deleted message
    pub message_id: String,
}
