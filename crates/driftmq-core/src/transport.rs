//! Transport abstraction for outbound connections.
//!
//! The pool only needs a way to open a fresh byte stream to one broker
//! endpoint. Production uses TCP or TLS over TCP; tests plug in in-memory
//! duplex pipes or a simulated network.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Opens byte streams to a single broker endpoint.
///
/// Each call to [`Connector::connect`] must yield an independent stream.
/// Framing happens above this trait, so any ordered, reliable byte stream
/// qualifies.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Stream type produced by this connector.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a new stream to the endpoint.
    ///
    /// Completes once the stream is ready for frames, including any TLS
    /// handshake.
    async fn connect(&self) -> io::Result<Self::Stream>;

    /// Endpoint description for logs.
    fn endpoint(&self) -> String;
}
