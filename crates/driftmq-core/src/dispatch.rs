//! Message type to handler registration table.
//!
//! The table is built once at startup and shared read-only by every
//! connection task, so lookups need no locking. Heartbeats never reach it:
//! the liveness layer consumes them first.

use std::{collections::HashMap, fmt, sync::Arc};

use driftmq_proto::{Frame, MessageType};
use tracing::trace;

use crate::error::{DispatchError, HandlerError};

/// Business logic for one message type.
///
/// Handlers are synchronous; the server runs them on the blocking pool so
/// they may touch the disk. `Ok(None)` means the request needs no reply.
pub trait FrameHandler: Send + Sync + 'static {
    /// Process one request frame.
    fn handle(&self, frame: &Frame) -> Result<Option<Frame>, HandlerError>;
}

impl<F> FrameHandler for F
where
    F: Fn(&Frame) -> Result<Option<Frame>, HandlerError> + Send + Sync + 'static,
{
    fn handle(&self, frame: &Frame) -> Result<Option<Frame>, HandlerError> {
        self(frame)
    }
}

/// Immutable map from message type to handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageType, Arc<dyn FrameHandler>>,
}

impl HandlerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `message_type`, replacing any previous one.
    #[must_use]
    pub fn register(mut self, message_type: MessageType, handler: impl FrameHandler) -> Self {
        self.handlers.insert(message_type, Arc::new(handler));
        self
    }

    /// Whether a handler exists for `message_type`.
    pub fn contains(&self, message_type: MessageType) -> bool {
        self.handlers.contains_key(&message_type)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Route `frame` to its handler.
    pub fn dispatch(&self, frame: &Frame) -> Result<Option<Frame>, DispatchError> {
        let raw = frame.message_type();
        let handler = MessageType::from_u8(raw)
            .and_then(|ty| self.handlers.get(&ty))
            .ok_or(DispatchError::Unhandled(raw))?;

        trace!(message_type = raw, body_len = frame.body().len(), "dispatching");
        handler
            .handle(frame)
            .map_err(|source| DispatchError::Handler { message_type: raw, source })
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort();
        f.debug_struct("HandlerRegistry").field("types", &types).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(frame: &Frame) -> Result<Option<Frame>, HandlerError> {
        Ok(Some(frame.clone()))
    }

    #[test]
    fn routes_by_message_type() {
        let registry = HandlerRegistry::new()
            .register(MessageType::Fetch, echo)
            .register(MessageType::Delete, |_: &Frame| -> Result<Option<Frame>, HandlerError> {
                Ok(None)
            });

        let fetch = Frame::new(MessageType::Fetch, vec![1, 2]).unwrap();
        assert_eq!(registry.dispatch(&fetch).unwrap(), Some(fetch));

        let delete = Frame::new(MessageType::Delete, vec![]).unwrap();
        assert_eq!(registry.dispatch(&delete).unwrap(), None);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unregistered_known_type() {
        let registry = HandlerRegistry::new().register(MessageType::Fetch, echo);
        let frame = Frame::new(MessageType::Produce, vec![]).unwrap();

        assert!(matches!(
            registry.dispatch(&frame),
            Err(DispatchError::Unhandled(0x10))
        ));
    }

    #[test]
    fn unknown_discriminator() {
        let registry = HandlerRegistry::new().register(MessageType::Fetch, echo);
        let frame = Frame::with_raw_type(0xEE, vec![]).unwrap();

        assert!(matches!(registry.dispatch(&frame), Err(DispatchError::Unhandled(0xEE))));
    }

    #[test]
    fn handler_failure_is_wrapped() {
        let registry = HandlerRegistry::new().register(
            MessageType::Fetch,
            |_: &Frame| -> Result<Option<Frame>, HandlerError> {
                Err(HandlerError::Store("disk full".into()))
            },
        );
        let frame = Frame::new(MessageType::Fetch, vec![]).unwrap();

        let err = registry.dispatch(&frame).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Handler { message_type: 0x12, source: HandlerError::Store(_) }
        ));
    }
}
