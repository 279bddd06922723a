//! Stream codec with half-packet reassembly.
//!
//! [`FrameCodec`] plugs into `tokio_util::codec::Framed`. The decode buffer
//! belongs to exactly one connection, so no locking is involved. A partial
//! frame never consumes bytes: the header is only peeked until the whole
//! body is buffered, which means the next call restarts from the frame's
//! true start.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    Frame, FrameHeader,
    errors::{ProtocolError, Result},
};

/// Default ceiling for a frame body (10 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: u32 = 10 * 1024 * 1024;

/// Frame codec for one connection.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_length: u32,
}

impl FrameCodec {
    /// Create a codec that rejects bodies larger than `max_frame_length`.
    pub fn new(max_frame_length: u32) -> Self {
        Self { max_frame_length }
    }

    /// Configured body length ceiling.
    pub fn max_frame_length(&self) -> u32 {
        self.max_frame_length
    }

    fn check_length(&self, length: u32) -> Result<()> {
        if length > self.max_frame_length {
            return Err(ProtocolError::FrameTooLarge {
                length: u64::from(length),
                max: self.max_frame_length,
            });
        }
        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < FrameHeader::SIZE {
            return Ok(None);
        }

        // Peek only: nothing is consumed until the full frame is present.
        let header = FrameHeader::parse(&src[..FrameHeader::SIZE])?;
        let body_length = header.body_length();

        // Reject before buffering any body bytes.
        self.check_length(body_length)?;

        let frame_len = FrameHeader::SIZE + body_length as usize;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let mut raw = src.split_to(frame_len);
        let body = raw.split_off(FrameHeader::SIZE).freeze();

        Ok(Some(Frame::from_parts(header, body)))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        self.check_length(frame.header().body_length())?;
        frame.encode(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageType;

    fn frame(ty: MessageType, body: &[u8]) -> Frame {
        Frame::new(ty, body.to_vec()).unwrap()
    }

    #[test]
    fn short_buffer_waits_for_header() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0xCA, 0xFE, 0xBA][..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn partial_body_leaves_buffer_untouched() {
        let mut codec = FrameCodec::default();
        let encoded = frame(MessageType::Produce, b"hello world").to_bytes();
        let mut buf = BytesMut::from(&encoded[..FrameHeader::SIZE + 4]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], &encoded[..FrameHeader::SIZE + 4]);

        buf.extend_from_slice(&encoded[FrameHeader::SIZE + 4..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded.body().as_ref(), b"hello world");
        assert!(buf.is_empty());
    }

    #[test]
    fn back_to_back_frames_decode_in_order() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(frame(MessageType::Fetch, b"a"), &mut buf).unwrap();
        codec.encode(Frame::heartbeat(), &mut buf).unwrap();
        codec.encode(frame(MessageType::Delete, b"bc"), &mut buf).unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        let third = codec.decode(&mut buf).unwrap().unwrap();

        assert_eq!(first.message_type_enum(), Some(MessageType::Fetch));
        assert!(second.is_heartbeat());
        assert_eq!(third.body().as_ref(), b"bc");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn bad_magic_is_fatal() {
        let mut codec = FrameCodec::default();
        let mut bytes = frame(MessageType::Fetch, b"x").to_bytes().to_vec();
        bytes[0] = 0x00;
        let mut buf = BytesMut::from(&bytes[..]);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidMagic { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn bad_version_is_fatal() {
        let mut codec = FrameCodec::default();
        let mut bytes = frame(MessageType::Fetch, b"x").to_bytes().to_vec();
        bytes[4] = 0x09;
        let mut buf = BytesMut::from(&bytes[..]);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedVersion { found: 9, .. }));
    }

    #[test]
    fn oversized_length_is_rejected_without_body() {
        let mut codec = FrameCodec::new(1024);
        let header = FrameHeader::new(MessageType::Produce.to_u8(), u32::MAX);
        let mut buf = BytesMut::from(&header.to_bytes()[..]);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::FrameTooLarge { length, max: 1024 } if length == u64::from(u32::MAX)
        ));
        // Nothing was reserved for the hostile length.
        assert!(buf.capacity() < 1024);
    }

    #[test]
    fn length_at_ceiling_is_accepted() {
        let mut codec = FrameCodec::new(4);
        let mut buf = BytesMut::new();
        codec.encode(frame(MessageType::Produce, b"four"), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.body().len(), 4);
    }

    #[test]
    fn encoder_enforces_ceiling() {
        let mut codec = FrameCodec::new(2);
        let mut buf = BytesMut::new();

        let err = codec.encode(frame(MessageType::Produce, b"abc"), &mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { length: 3, max: 2 }));
        assert!(buf.is_empty());
    }
}
