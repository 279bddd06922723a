//! Fixed 16-byte frame header.
//!
//! ```text
//!  0               4   5               9   10                    16
//!  +---------------+---+---------------+---+---------------------+
//!  | magic (u32)   |ver| body_len (u32)|typ| reserved (zero)     |
//!  +---------------+---+---------------+---+---------------------+
//! ```
//!
//! All multi-byte fields are big-endian. The reserved tail pads the header
//! to its declared size and is written as zeros; readers ignore it.

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, byteorder::big_endian::U32,
};

use crate::{
    MessageType,
    errors::{ProtocolError, Result},
};

/// Frame header as laid out on the wire.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct FrameHeader {
    magic: U32,
    version: u8,
    body_length: U32,
    message_type: u8,
    reserved: [u8; 6],
}

const _: () = assert!(size_of::<FrameHeader>() == FrameHeader::SIZE);

impl FrameHeader {
    /// Header size on the wire.
    pub const SIZE: usize = 16;

    /// Protocol sentinel at the start of every frame.
    pub const MAGIC: u32 = 0xCAFE_BABE;

    /// The only protocol version this build speaks.
    pub const VERSION: u8 = 0x01;

    /// Build a header for a body of `body_length` bytes.
    pub fn new(message_type: u8, body_length: u32) -> Self {
        Self {
            magic: U32::new(Self::MAGIC),
            version: Self::VERSION,
            body_length: U32::new(body_length),
            message_type,
            reserved: [0; 6],
        }
    }

    /// Parse and validate magic and version from the first [`Self::SIZE`]
    /// bytes of `bytes`.
    ///
    /// Does not enforce a body length ceiling; that is a per-connection
    /// setting owned by [`crate::FrameCodec`].
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let Some(raw) = bytes.get(..Self::SIZE) else {
            return Err(ProtocolError::TruncatedHeader {
                expected: Self::SIZE,
                found: bytes.len(),
            });
        };

        let header = Self::read_from_bytes(raw).map_err(|_| ProtocolError::TruncatedHeader {
            expected: Self::SIZE,
            found: raw.len(),
        })?;

        if header.magic() != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic {
                expected: Self::MAGIC,
                found: header.magic(),
            });
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                found: header.version,
                supported: Self::VERSION,
            });
        }

        Ok(header)
    }

    /// Magic sentinel.
    pub fn magic(&self) -> u32 {
        self.magic.get()
    }

    /// Protocol version.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Declared body length in bytes.
    pub fn body_length(&self) -> u32 {
        self.body_length.get()
    }

    /// Raw message type byte.
    pub fn message_type(&self) -> u8 {
        self.message_type
    }

    /// Message type, if it is one this build knows.
    pub fn message_type_enum(&self) -> Option<MessageType> {
        MessageType::from_u8(self.message_type)
    }

    /// Header bytes as written to the wire.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }
}
