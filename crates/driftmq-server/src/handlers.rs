//! Queue request handlers.
//!
//! Each handler decodes one request payload, calls the store and encodes the
//! reply. They run on the blocking pool, so calling the synchronous store
//! directly is fine.

use std::sync::Arc;

use driftmq_core::{FrameHandler, HandlerError, HandlerRegistry};
use driftmq_proto::{
    Frame, MessageType, Payload,
    payloads::{ConnectResponse, DeleteAck, FetchResponse, FetchedMessage, ProduceAck},
};
use driftmq_store::{MessageStore, StoreError};
use tracing::{debug, info};

/// Build the dispatch table for a broker.
pub fn registry(server_id: &str, store: &Arc<MessageStore>) -> HandlerRegistry {
    HandlerRegistry::new()
        .register(MessageType::ConnectRequest, ConnectHandler { server_id: server_id.to_owned() })
        .register(MessageType::Produce, ProduceHandler { store: Arc::clone(store) })
        .register(MessageType::Fetch, FetchHandler { store: Arc::clone(store) })
        .register(MessageType::Delete, DeleteHandler { store: Arc::clone(store) })
}

/// Caller mistakes become `BadRequest`; everything else is a store failure.
fn store_error(err: StoreError) -> HandlerError {
    match err {
        StoreError::InvalidQueueName(_) | StoreError::InvalidMessage { .. } => {
            HandlerError::BadRequest(err.to_string())
        },
        StoreError::MessageNotFound { .. } => HandlerError::NotFound(err.to_string()),
        other => HandlerError::Store(other.to_string()),
    }
}

fn mismatched(expected: MessageType, payload: &Payload) -> HandlerError {
    HandlerError::BadRequest(format!(
        "expected {expected:?} payload, got {:?}",
        payload.message_type()
    ))
}

/// Answers the client greeting.
#[derive(Debug)]
pub struct ConnectHandler {
    server_id: String,
}

impl FrameHandler for ConnectHandler {
    fn handle(&self, frame: &Frame) -> Result<Option<Frame>, HandlerError> {
        let request = match Payload::from_frame(frame)? {
            Payload::ConnectRequest(request) => request,
            other => return Err(mismatched(MessageType::ConnectRequest, &other)),
        };

        info!(
            client_id = %request.client_id,
            client_type = %request.client_type,
            client_version = %request.client_version,
            "client connected"
        );

        let reply = Payload::ConnectResponse(ConnectResponse {
            success: true,
            message: String::from("connected"),
            server_id: self.server_id.clone(),
        });
        Ok(Some(reply.into_frame()?))
    }
}

/// Saves a batch and acknowledges once it is on disk.
#[derive(Debug)]
pub struct ProduceHandler {
    store: Arc<MessageStore>,
}

impl FrameHandler for ProduceHandler {
    fn handle(&self, frame: &Frame) -> Result<Option<Frame>, HandlerError> {
        let request = match Payload::from_frame(frame)? {
            Payload::Produce(request) => request,
            other => return Err(mismatched(MessageType::Produce, &other)),
        };

        let offsets =
            self.store.batch_save(&request.queue, request.messages).map_err(store_error)?;
        self.store.flush_queue(&request.queue).map_err(store_error)?;
        debug!(queue = %request.queue, first_offset = offsets.start, end = offsets.end, "produced");

        let reply = Payload::ProduceAck(ProduceAck {
            first_offset: offsets.start,
            count: offsets.end - offsets.start,
            queue: request.queue,
        });
        Ok(Some(reply.into_frame()?))
    }
}

/// Returns every live message in a queue.
#[derive(Debug)]
pub struct FetchHandler {
    store: Arc<MessageStore>,
}

impl FrameHandler for FetchHandler {
    fn handle(&self, frame: &Frame) -> Result<Option<Frame>, HandlerError> {
        let request = match Payload::from_frame(frame)? {
            Payload::Fetch(request) => request,
            other => return Err(mismatched(MessageType::Fetch, &other)),
        };

        let messages = self
            .store
            .load_queue_message(&request.queue)
            .map_err(store_error)?
            .into_iter()
            .map(|stored| FetchedMessage {
                offset: stored.offset,
                message_id: stored.message_id,
                body: stored.payload.to_vec(),
            })
            .collect();

        let reply = Payload::FetchResponse(FetchResponse { queue: request.queue, messages });
        Ok(Some(reply.into_frame()?))
    }
}

/// Tombstones one message.
#[derive(Debug)]
pub struct DeleteHandler {
    store: Arc<MessageStore>,
}

impl FrameHandler for DeleteHandler {
    fn handle(&self, frame: &Frame) -> Result<Option<Frame>, HandlerError> {
        let request = match Payload::from_frame(frame)? {
            Payload::Delete(request) => request,
            other => return Err(mismatched(MessageType::Delete, &other)),
        };

        self.store.delete(&request.queue, &request.message_id).map_err(store_error)?;

        let reply = Payload::DeleteAck(DeleteAck {
            queue: request.queue,
            message_id: request.message_id,
        });
        Ok(Some(reply.into_frame()?))
    }
}

#[cfg(test)]
mod tests {
    use driftmq_proto::payloads::{Delete, ErrorCode, Fetch, MessageItem, Produce};
    use driftmq_store::StoreConfig;
    use tempfile::TempDir;

    use super::*;

    fn store() -> (TempDir, Arc<MessageStore>) {
        let dir = TempDir::new().unwrap();
        let store = MessageStore::open(StoreConfig::new(dir.path())).unwrap();
        (dir, Arc::new(store))
    }

    fn call(registry: &HandlerRegistry, payload: Payload) -> Payload {
        let reply = registry.dispatch(&payload.into_frame().unwrap()).unwrap().unwrap();
        Payload::from_frame(&reply).unwrap()
    }

    fn item(id: &str, body: &[u8]) -> MessageItem {
        MessageItem { message_id: id.into(), body: body.to_vec() }
    }

    #[test]
    fn registry_covers_request_types() {
        let (_dir, store) = store();
        let registry = registry("b-1", &store);

        let request_types = [
            MessageType::ConnectRequest,
            MessageType::Produce,
            MessageType::Fetch,
            MessageType::Delete,
        ];
        for ty in request_types {
            assert!(registry.contains(ty), "{ty:?}");
        }
        assert!(!registry.contains(MessageType::Heartbeat));
    }

    #[test]
    fn produce_is_durable_before_ack() {
        let (_dir, store) = store();
        let registry = registry("b-1", &store);

        let ack = call(
            &registry,
            Payload::Produce(Produce {
                queue: "orders".into(),
                messages: vec![item("a", b"1"), item("b", b"2")],
            }),
        );
        assert_eq!(
            ack,
            Payload::ProduceAck(ProduceAck { queue: "orders".into(), first_offset: 0, count: 2 })
        );

        // Visible without an explicit flush
        let loaded = store.load_queue_message("orders").unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn fetch_skips_deleted() {
        let (_dir, store) = store();
        let registry = registry("b-1", &store);

        call(
            &registry,
            Payload::Produce(Produce {
                queue: "q".into(),
                messages: vec![item("a", b"1"), item("b", b"2")],
            }),
        );
        let delete = Delete { queue: "q".into(), message_id: "a".into() };
        let ack = call(&registry, Payload::Delete(delete));
        assert!(matches!(ack, Payload::DeleteAck(_)));

        let fetch = Fetch { queue: "q".into() };
        let Payload::FetchResponse(response) = call(&registry, Payload::Fetch(fetch)) else {
            unreachable!("expected fetch response");
        };
        assert_eq!(response.messages.len(), 1);
        assert_eq!(response.messages[0].message_id, "b");
        assert_eq!(response.messages[0].offset, 1);
        assert_eq!(response.messages[0].body, b"2");
    }

    #[test]
    fn invalid_queue_is_bad_request() {
        let (_dir, store) = store();
        let registry = registry("b-1", &store);

        let frame = Payload::Fetch(Fetch { queue: "../etc".into() }).into_frame().unwrap();
        let err = registry.dispatch(&frame).unwrap_err();
        let Payload::Error(reply) = err.error_reply() else {
            unreachable!("expected error payload");
        };
        assert_eq!(reply.code, ErrorCode::BadRequest);
    }

    #[test]
    fn delete_of_unknown_message_is_not_found() {
        let (_dir, store) = store();
        let registry = registry("b-1", &store);

        let frame = Payload::Delete(Delete { queue: "q".into(), message_id: "a".into() })
            .into_frame()
            .unwrap();
        let err = registry.dispatch(&frame).unwrap_err();
        let Payload::Error(reply) = err.error_reply() else {
            unreachable!("expected error payload");
        };
        assert_eq!(reply.code, ErrorCode::NotFound);
        assert!(store.queues().is_empty());
    }

    #[test]
    fn closed_store_is_store_failure() {
        let (_dir, store) = store();
        let registry = registry("b-1", &store);
        store.close().unwrap();

        let frame = Payload::Produce(Produce { queue: "q".into(), messages: vec![item("a", b"1")] })
            .into_frame()
            .unwrap();
        let err = registry.dispatch(&frame).unwrap_err();
        let Payload::Error(reply) = err.error_reply() else {
            unreachable!("expected error payload");
        };
        assert_eq!(reply.code, ErrorCode::StoreFailure);
    }
}
