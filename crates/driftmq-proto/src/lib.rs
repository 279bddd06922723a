//! Wire format for the driftmq broker protocol.
//!
//! Frames consist of a fixed 16-byte header (zero-copy binary, big-endian)
//! followed by a variable-length body. The header carries just enough to
//! validate and route a frame: a magic sentinel, the protocol version, the
//! body length and a one-byte message type. Bodies are CBOR-encoded
//! [`Payload`]s, but the codec itself treats them as opaque bytes.
//!
//! # Security
//!
//! Header parsing uses compile-time verified layouts via `zerocopy`. The
//! declared body length is checked against a configured ceiling before a
//! single body byte is buffered, so a hostile length field cannot force a
//! large allocation. A frame that fails magic, version or length validation
//! poisons the connection: there is no attempt to resynchronise mid-stream.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod errors;
pub mod frame;
pub mod header;
pub mod message_type;
pub mod payloads;

pub use codec::{DEFAULT_MAX_FRAME_LENGTH, FrameCodec};
pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use message_type::MessageType;
pub use payloads::Payload;
