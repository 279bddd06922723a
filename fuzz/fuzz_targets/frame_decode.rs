//! Arbitrary bytes through the stream decoder.
//!
//! The input is fed in two chunks at a fuzzer-chosen split point. Decoding
//! must never panic, must never consume bytes of an incomplete frame, and
//! every decoded frame must re-encode to exactly the bytes it came from.

#![no_main]

use bytes::BytesMut;
use driftmq_proto::{FrameCodec, Payload};
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

const MAX_FRAME_LENGTH: u32 = 64 * 1024;

fuzz_target!(|data: &[u8]| {
    let Some((&split, data)) = data.split_first() else {
        return;
    };
    let split = usize::from(split).min(data.len());

    let mut codec = FrameCodec::new(MAX_FRAME_LENGTH);
    let mut buf = BytesMut::from(&data[..split]);
    let mut consumed = Vec::new();

    for chunk in [&data[split..], &[][..]] {
        loop {
            let before = buf.clone();
            match codec.decode(&mut buf) {
                Ok(Some(frame)) => {
                    let encoded = frame.to_bytes();
                    assert_eq!(&encoded[..], &before[..encoded.len()]);
                    consumed.extend_from_slice(&encoded);
                    // Payload parsing may fail but must not panic
                    let _ = Payload::from_frame(&frame);
                },
                Ok(None) => {
                    assert_eq!(buf, before);
                    break;
                },
                Err(_) => return,
            }
        }
        buf.extend_from_slice(chunk);
    }

    assert!(data.starts_with(&consumed));
});
