//! TCP and TLS connectors.

use std::{io, sync::Arc, time::Duration};

use async_trait::async_trait;
use driftmq_core::Connector;
use rustls::{ClientConfig, pki_types::ServerName};
use tokio::{net::TcpStream, time::timeout};
use tokio_rustls::client::TlsStream;
use tracing::debug;

/// Plain TCP to one broker address.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Connector for `addr` (`host:port`).
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self { addr: addr.into(), connect_timeout }
    }

    async fn connect_tcp(&self) -> io::Result<TcpStream> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {} timed out after {:?}", self.addr, self.connect_timeout),
                )
            })??;
        stream.set_nodelay(true)?;
        debug!(addr = %self.addr, "tcp connected");
        Ok(stream)
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        self.connect_tcp().await
    }

    fn endpoint(&self) -> String {
        self.addr.clone()
    }
}

/// TLS over TCP to one broker address.
///
/// Certificates and trust roots come from the caller's
/// [`rustls::ClientConfig`].
#[derive(Clone)]
pub struct TlsConnector {
    tcp: TcpConnector,
    tls: tokio_rustls::TlsConnector,
    server_name: ServerName<'static>,
}

impl TlsConnector {
    /// Connector for `addr`, verifying the broker certificate against
    /// `server_name`.
    pub fn new(
        tcp: TcpConnector,
        server_name: &str,
        config: Arc<ClientConfig>,
    ) -> io::Result<Self> {
        let server_name = ServerName::try_from(server_name.to_owned())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        Ok(Self { tcp, tls: tokio_rustls::TlsConnector::from(config), server_name })
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("addr", &self.tcp.addr)
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for TlsConnector {
    type Stream = TlsStream<TcpStream>;

    async fn connect(&self) -> io::Result<Self::Stream> {
        let tcp = self.tcp.connect_tcp().await?;
        let handshake = self.tls.connect(self.server_name.clone(), tcp);
        let stream = timeout(self.tcp.connect_timeout, handshake)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"))??;
        debug!(addr = %self.tcp.addr, "tls established");
        Ok(stream)
    }

    fn endpoint(&self) -> String {
        format!("tls://{}", self.tcp.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refused_connect_is_an_io_error() {
        // Bind then drop to find a port with no listener
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = TcpConnector::new(addr.to_string(), Duration::from_secs(1));
        assert!(connector.connect().await.is_err());
        assert_eq!(connector.endpoint(), addr.to_string());
    }

    #[tokio::test]
    async fn tcp_connect_sets_nodelay() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connector = TcpConnector::new(addr.to_string(), Duration::from_secs(1));
        let (stream, _) = tokio::join!(connector.connect(), listener.accept());
        assert!(stream.unwrap().nodelay().unwrap());
    }

    #[test]
    fn invalid_server_name_is_rejected() {
        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(rustls::RootCertStore::empty())
        .with_no_client_auth();

        let tcp = TcpConnector::new("127.0.0.1:1", Duration::from_secs(1));
        assert!(TlsConnector::new(tcp, "not a hostname!", Arc::new(config)).is_err());
    }
}
