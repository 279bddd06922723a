//! Typed frame bodies.
//!
//! Each [`MessageType`] has exactly one payload shape. Bodies are CBOR so
//! fields can be added without a new protocol version; the heartbeat body is
//! always empty so it can be produced and checked without a serializer.

pub mod queue;
pub mod session;

use serde::{Serialize, de::DeserializeOwned};

pub use queue::{
    Delete, DeleteAck, Fetch, FetchResponse, FetchedMessage, MessageItem, Produce, ProduceAck,
};
pub use session::{ConnectRequest, ConnectResponse, ErrorCode, ErrorReply};

use crate::{
    Frame, MessageType,
    errors::{ProtocolError, Result},
};

/// Decoded frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Keepalive
    Heartbeat,
    /// Client greeting
    ConnectRequest(ConnectRequest),
    /// Greeting reply
    ConnectResponse(ConnectResponse),
    /// Append messages
    Produce(Produce),
    /// Offsets for an append
    ProduceAck(ProduceAck),
    /// Read a queue
    Fetch(Fetch),
    /// Queue contents
    FetchResponse(FetchResponse),
    /// Delete a message
    Delete(Delete),
    /// Deletion confirmed
    DeleteAck(DeleteAck),
    /// Request failed
    Error(ErrorReply),
}

impl Payload {
    /// Message type this payload travels under.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Heartbeat => MessageType::Heartbeat,
            Self::ConnectRequest(_) => MessageType::ConnectRequest,
            Self::ConnectResponse(_) => MessageType::ConnectResponse,
            Self::Produce(_) => MessageType::Produce,
            Self::ProduceAck(_) => MessageType::ProduceAck,
            Self::Fetch(_) => MessageType::Fetch,
            Self::FetchResponse(_) => MessageType::FetchResponse,
            Self::Delete(_) => MessageType::Delete,
            Self::DeleteAck(_) => MessageType::DeleteAck,
            Self::Error(_) => MessageType::Error,
        }
    }

    /// Shorthand for an [`ErrorReply`] payload.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(ErrorReply { code, message: message.into() })
    }

    /// Serialize into a frame.
    pub fn into_frame(self) -> Result<Frame> {
        let body = match &self {
            Self::Heartbeat => return Ok(Frame::heartbeat()),
            Self::ConnectRequest(p) => to_cbor(p)?,
            Self::ConnectResponse(p) => to_cbor(p)?,
            Self::Produce(p) => to_cbor(p)?,
            Self::ProduceAck(p) => to_cbor(p)?,
            Self::Fetch(p) => to_cbor(p)?,
            Self::FetchResponse(p) => to_cbor(p)?,
            Self::Delete(p) => to_cbor(p)?,
            Self::DeleteAck(p) => to_cbor(p)?,
            Self::Error(p) => to_cbor(p)?,
        };

        Frame::new(self.message_type(), body)
    }

    /// Deserialize the body of `frame` according to its message type.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let Some(ty) = frame.message_type_enum() else {
            return Err(ProtocolError::UnexpectedMessageType(frame.message_type()));
        };
        let body = frame.body().as_ref();

        Ok(match ty {
            MessageType::Heartbeat => Self::Heartbeat,
            MessageType::ConnectRequest => Self::ConnectRequest(from_cbor(body)?),
            MessageType::ConnectResponse => Self::ConnectResponse(from_cbor(body)?),
            MessageType::Produce => Self::Produce(from_cbor(body)?),
            MessageType::ProduceAck => Self::ProduceAck(from_cbor(body)?),
            MessageType::Fetch => Self::Fetch(from_cbor(body)?),
            MessageType::FetchResponse => Self::FetchResponse(from_cbor(body)?),
            MessageType::Delete => Self::Delete(from_cbor(body)?),
            MessageType::DeleteAck => Self::DeleteAck(from_cbor(body)?),
            MessageType::Error => Self::Error(from_cbor(body)?),
        })
    }
}

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| ProtocolError::PayloadEncode(e.to_string()))?;
    Ok(buf)
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::PayloadDecode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produce_survives_framing() {
        let payload = Payload::Produce(Produce {
            queue: "orders".into(),
            messages: vec![
                MessageItem { message_id: "m-1".into(), body: vec![1, 2, 3] },
                MessageItem { message_id: "m-2".into(), body: vec![] },
            ],
        });

        let frame = payload.clone().into_frame().unwrap();
        assert_eq!(frame.message_type_enum(), Some(MessageType::Produce));
        assert_eq!(Payload::from_frame(&frame).unwrap(), payload);
    }

    #[test]
    fn heartbeat_body_is_empty() {
        let frame = Payload::Heartbeat.into_frame().unwrap();

        assert!(frame.body().is_empty());
        assert_eq!(Payload::from_frame(&frame).unwrap(), Payload::Heartbeat);
    }

    #[test]
    fn error_code_is_numeric_on_the_wire() {
        let payload = Payload::error(ErrorCode::StoreFailure, "disk full");
        let frame = payload.clone().into_frame().unwrap();

        assert_eq!(Payload::from_frame(&frame).unwrap(), payload);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let frame = Frame::with_raw_type(0xEE, vec![0xA0]).unwrap();

        assert!(matches!(
            Payload::from_frame(&frame),
            Err(ProtocolError::UnexpectedMessageType(0xEE))
        ));
    }

    #[test]
    fn garbage_body_is_a_recoverable_error() {
        let frame = Frame::new(MessageType::Fetch, vec![0xFF, 0x00, 0x13]).unwrap();
        let err = Payload::from_frame(&frame).unwrap_err();

        assert!(matches!(err, ProtocolError::PayloadDecode(_)));
        assert!(!err.is_fatal());
    }
}
