//! Immutable protocol frame.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    FrameHeader, MessageType,
    errors::{ProtocolError, Result},
};

/// One complete protocol message: header plus body.
///
/// Frames are value objects. The header is derived from the body at
/// construction time, so `header.body_length()` always equals `body.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    header: FrameHeader,
    body: Bytes,
}

impl Frame {
    /// Build a frame of a known message type.
    pub fn new(message_type: MessageType, body: impl Into<Bytes>) -> Result<Self> {
        Self::with_raw_type(message_type.to_u8(), body)
    }

    /// Build a frame from a raw message type byte.
    pub fn with_raw_type(message_type: u8, body: impl Into<Bytes>) -> Result<Self> {
        let body = body.into();
        let body_length = u32::try_from(body.len()).map_err(|_| ProtocolError::FrameTooLarge {
            length: body.len() as u64,
            max: u32::MAX,
        })?;

        Ok(Self { header: FrameHeader::new(message_type, body_length), body })
    }

    /// Heartbeat frame with an empty body.
    pub fn heartbeat() -> Self {
        Self { header: FrameHeader::new(MessageType::Heartbeat.to_u8(), 0), body: Bytes::new() }
    }

    /// Assemble a frame from a validated header and a body of exactly
    /// `header.body_length()` bytes.
    pub(crate) fn from_parts(header: FrameHeader, body: Bytes) -> Self {
        debug_assert_eq!(header.body_length() as usize, body.len());
        Self { header, body }
    }

    /// Frame header.
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Raw message type byte.
    pub fn message_type(&self) -> u8 {
        self.header.message_type()
    }

    /// Message type, if known.
    pub fn message_type_enum(&self) -> Option<MessageType> {
        self.header.message_type_enum()
    }

    /// Whether this is a heartbeat frame.
    pub fn is_heartbeat(&self) -> bool {
        self.message_type_enum() == Some(MessageType::Heartbeat)
    }

    /// Frame body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the frame, returning its body.
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Total size on the wire.
    pub fn wire_len(&self) -> usize {
        FrameHeader::SIZE + self.body.len()
    }

    /// Append the wire encoding of this frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_len());
        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.body);
    }

    /// Wire encoding of this frame.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.encode(&mut buf);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_tracks_body_length() {
        let frame = Frame::new(MessageType::Produce, vec![1, 2, 3]).unwrap();

        assert_eq!(frame.header().body_length(), 3);
        assert_eq!(frame.message_type(), 0x10);
        assert_eq!(frame.wire_len(), FrameHeader::SIZE + 3);
    }

    #[test]
    fn encoding_is_header_then_body() {
        let frame = Frame::new(MessageType::Fetch, b"abc".to_vec()).unwrap();
        let bytes = frame.to_bytes();

        assert_eq!(bytes.len(), 19);
        assert_eq!(&bytes[..4], &FrameHeader::MAGIC.to_be_bytes());
        assert_eq!(bytes[4], FrameHeader::VERSION);
        assert_eq!(&bytes[5..9], &3u32.to_be_bytes());
        assert_eq!(bytes[9], MessageType::Fetch.to_u8());
        assert_eq!(&bytes[10..16], &[0u8; 6]);
        assert_eq!(&bytes[16..], b"abc");
    }

    #[test]
    fn heartbeat_has_empty_body() {
        let frame = Frame::heartbeat();

        assert!(frame.is_heartbeat());
        assert!(frame.body().is_empty());
        assert_eq!(frame.wire_len(), FrameHeader::SIZE);
    }

    #[test]
    fn raw_types_are_preserved() {
        let frame = Frame::with_raw_type(0xEE, Bytes::new()).unwrap();

        assert_eq!(frame.message_type(), 0xEE);
        assert_eq!(frame.message_type_enum(), None);
    }
}
