//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while framing, parsing or encoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Header does not start with the protocol sentinel.
    #[error("invalid magic: expected {expected:#010x}, got {found:#010x}")]
    InvalidMagic {
        /// Expected magic value
        expected: u32,
        /// Value found on the wire
        found: u32,
    },

    /// Header carries a protocol version this build does not speak.
    #[error("unsupported protocol version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// Version found on the wire
        found: u8,
        /// Version this build supports
        supported: u8,
    },

    /// Declared body length exceeds the configured ceiling.
    #[error("frame body of {length} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Declared or actual body length
        length: u64,
        /// Configured maximum
        max: u32,
    },

    /// Fewer bytes than a full header were supplied to a header parser.
    #[error("truncated header: need {expected} bytes, got {found}")]
    TruncatedHeader {
        /// Required size
        expected: usize,
        /// Supplied size
        found: usize,
    },

    /// Frame carries a message type that does not match the requested payload.
    #[error("unexpected message type {0:#04x}")]
    UnexpectedMessageType(u8),

    /// CBOR serialization of a payload failed.
    #[error("payload encode failed: {0}")]
    PayloadEncode(String),

    /// CBOR deserialization of a payload failed.
    #[error("payload decode failed: {0}")]
    PayloadDecode(String),

    /// Underlying transport failed.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether this error leaves the byte stream unusable.
    ///
    /// Framing violations and transport failures are fatal: the connection
    /// must be closed because the stream cannot be realigned. Payload errors
    /// concern a single, fully-consumed frame and leave the stream intact.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::UnexpectedMessageType(_) | Self::PayloadEncode(_) | Self::PayloadDecode(_)
        )
    }
}
