//! Queue operations over a connection pool.

use std::sync::Arc;

use driftmq_core::Connector;
use driftmq_proto::{
    Payload,
    payloads::{Delete, DeleteAck, Fetch, FetchedMessage, MessageItem, Produce, ProduceAck},
};
use tracing::debug;

use crate::{
    error::{ClientError, ConnectionError},
    pool::ConnectionPool,
};

/// High-level broker client.
///
/// Every call borrows one pooled connection for a single request/reply and
/// returns it afterwards. A connection that fails mid-request is dropped
/// instead of returned.
#[derive(Debug)]
pub struct Client<C: Connector> {
    pool: Arc<ConnectionPool<C>>,
}

impl<C: Connector> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self { pool: Arc::clone(&self.pool) }
    }
}

impl<C: Connector> Client<C> {
    /// Client over `pool`.
    pub fn new(pool: ConnectionPool<C>) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Client sharing an existing pool.
    pub fn with_pool(pool: Arc<ConnectionPool<C>>) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &Arc<ConnectionPool<C>> {
        &self.pool
    }

    /// Append `messages` to `queue`. The broker acknowledges once they are
    /// on disk.
    pub async fn produce(
        &self,
        queue: &str,
        messages: Vec<MessageItem>,
    ) -> Result<ProduceAck, ClientError> {
        let request = Payload::Produce(Produce { queue: queue.to_owned(), messages });
        match self.call(request).await? {
            Payload::ProduceAck(ack) => Ok(ack),
            other => Err(unexpected(&other)),
        }
    }

    /// Every live message in `queue`, in offset order.
    pub async fn fetch(&self, queue: &str) -> Result<Vec<FetchedMessage>, ClientError> {
        match self.call(Payload::Fetch(Fetch { queue: queue.to_owned() })).await? {
            Payload::FetchResponse(response) => Ok(response.messages),
            other => Err(unexpected(&other)),
        }
    }

    /// Mark `message_id` in `queue` as deleted.
    pub async fn delete(&self, queue: &str, message_id: &str) -> Result<DeleteAck, ClientError> {
        let request =
            Payload::Delete(Delete { queue: queue.to_owned(), message_id: message_id.to_owned() });
        match self.call(request).await? {
            Payload::DeleteAck(ack) => Ok(ack),
            other => Err(unexpected(&other)),
        }
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn call(&self, request: Payload) -> Result<Payload, ClientError> {
        let mut conn = self.pool.acquire().await?;

        let reply = match conn.request(request).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!(error = %e, "request failed, dropping connection");
                conn.close().await;
                return Err(e.into());
            },
        };
        self.pool.release(conn).await;

        match reply {
            Payload::Error(err) => {
                Err(ClientError::Server { code: err.code, message: err.message })
            },
            reply => Ok(reply),
        }
    }
}

fn unexpected(reply: &Payload) -> ClientError {
    ConnectionError::UnexpectedReply(reply.message_type().to_u8()).into()
}
