//! Message type discriminators.
//!
//! The header carries the raw byte so that frames with unknown types still
//! decode cleanly; rejecting them is the dispatcher's job, not the codec's.

/// Known message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageType {
    /// Keepalive, empty body. Consumed by the liveness layer.
    Heartbeat = 0x01,
    /// Client greeting sent once per connection.
    ConnectRequest = 0x02,
    /// Broker reply to [`MessageType::ConnectRequest`].
    ConnectResponse = 0x03,
    /// Append messages to a queue.
    Produce = 0x10,
    /// Offsets assigned to a [`MessageType::Produce`].
    ProduceAck = 0x11,
    /// Read every durable message of a queue.
    Fetch = 0x12,
    /// Messages returned for a [`MessageType::Fetch`].
    FetchResponse = 0x13,
    /// Logically delete one message.
    Delete = 0x14,
    /// Confirms a [`MessageType::Delete`].
    DeleteAck = 0x15,
    /// Request failed; body carries a code and description.
    Error = 0x7F,
}

impl MessageType {
    /// All known message types.
    pub const ALL: [Self; 10] = [
        Self::Heartbeat,
        Self::ConnectRequest,
        Self::ConnectResponse,
        Self::Produce,
        Self::ProduceAck,
        Self::Fetch,
        Self::FetchResponse,
        Self::Delete,
        Self::DeleteAck,
        Self::Error,
    ];

    /// Look up a message type by its wire value.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.to_u8() == value)
    }

    /// Wire value of this message type.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Self::from_u8(value).ok_or(value)
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        value.to_u8()
    }
}
