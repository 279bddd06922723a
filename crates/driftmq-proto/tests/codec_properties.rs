//! Property tests for frame encoding and half-packet reassembly.

use bytes::BytesMut;
use driftmq_proto::{Frame, FrameCodec, FrameHeader, ProtocolError};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

fn arb_frame() -> impl Strategy<Value = Frame> {
    (any::<u8>(), prop::collection::vec(any::<u8>(), 0..2048))
        .prop_map(|(ty, body)| Frame::with_raw_type(ty, body).unwrap())
}

proptest! {
    #[test]
    fn decode_inverts_encode(frame in arb_frame()) {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();

        prop_assert_eq!(buf.len(), FrameHeader::SIZE + frame.body().len());

        let decoded = codec.decode(&mut buf).unwrap();
        prop_assert_eq!(decoded, Some(frame));
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn split_frame_reassembles(frame in arb_frame(), split in any::<prop::sample::Index>()) {
        let mut codec = FrameCodec::default();
        let encoded = frame.to_bytes();
        let at = split.index(encoded.len());

        let mut buf = BytesMut::from(&encoded[..at]);
        prop_assert_eq!(codec.decode(&mut buf).unwrap(), None);
        prop_assert_eq!(&buf[..], &encoded[..at]);

        buf.extend_from_slice(&encoded[at..]);
        prop_assert_eq!(codec.decode(&mut buf).unwrap(), Some(frame));
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn split_followed_by_second_frame(
        first in arb_frame(),
        second in arb_frame(),
        split in any::<prop::sample::Index>(),
    ) {
        let mut codec = FrameCodec::default();
        let mut stream = first.to_bytes().to_vec();
        stream.extend_from_slice(&second.to_bytes());
        let at = split.index(stream.len());

        let mut buf = BytesMut::from(&stream[..at]);
        let mut out = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            out.push(frame);
        }
        buf.extend_from_slice(&stream[at..]);
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            out.push(frame);
        }

        prop_assert_eq!(out, vec![first, second]);
    }

    #[test]
    fn wrong_magic_never_yields_a_frame(frame in arb_frame(), magic in any::<u32>()) {
        prop_assume!(magic != FrameHeader::MAGIC);

        let mut codec = FrameCodec::default();
        let mut bytes = frame.to_bytes().to_vec();
        bytes[..4].copy_from_slice(&magic.to_be_bytes());
        let mut buf = BytesMut::from(&bytes[..]);

        let is_invalid_magic =
            matches!(codec.decode(&mut buf), Err(ProtocolError::InvalidMagic { .. }));
        prop_assert!(is_invalid_magic);
    }

    #[test]
    fn over_ceiling_length_is_rejected_from_header_alone(
        max in 0u32..65_536,
        excess in 1u32..1_000_000,
    ) {
        let mut codec = FrameCodec::new(max);
        let header = FrameHeader::new(0x10, max + excess);
        let mut buf = BytesMut::from(&header.to_bytes()[..]);

        let is_too_large =
            matches!(codec.decode(&mut buf), Err(ProtocolError::FrameTooLarge { .. }));
        prop_assert!(is_too_large);
    }
}
