//! Accept loop and per-connection driver.

use std::{sync::Arc, time::Instant};

use driftmq_core::{
    HandlerRegistry, Liveness, LivenessAction, LivenessConfig, Observed, Role,
};
use driftmq_proto::{Frame, FrameCodec, Payload, payloads::ErrorCode};
use driftmq_store::MessageStore;
use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
};
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use crate::{config::ServerConfig, error::ServerError, handlers};

/// Current time on the runtime clock, so paused test time applies.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// The broker: owns the store handle and the dispatch table.
#[derive(Debug)]
pub struct BrokerServer {
    config: ServerConfig,
    store: Arc<MessageStore>,
    registry: Arc<HandlerRegistry>,
}

impl BrokerServer {
    /// Broker serving `store` with the standard queue handlers.
    pub fn new(config: ServerConfig, store: Arc<MessageStore>) -> Self {
        let registry = Arc::new(handlers::registry(&config.server_id, &store));
        Self { config, store, registry }
    }

    /// Broker configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Store the broker writes to.
    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    /// Bind a listener on the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        TcpListener::bind(&self.config.bind)
            .await
            .map_err(|source| ServerError::Bind { addr: self.config.bind.clone(), source })
    }

    /// Accept connections forever, one task each.
    ///
    /// With an acceptor, every connection is upgraded to TLS before the
    /// first frame. Accept errors are logged and the loop continues; drop the
    /// future to stop accepting.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        tls: Option<TlsAcceptor>,
    ) -> Result<(), ServerError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, tls = tls.is_some(), "broker listening");
        }

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                },
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!(%peer, error = %e, "cannot set TCP_NODELAY");
            }

            let server = Arc::clone(&self);
            let tls = tls.clone();
            tokio::spawn(async move {
                let peer = peer.to_string();
                let result = match tls {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(stream) => server.serve_connection(stream, &peer).await,
                        Err(e) => Err(ServerError::Tls(e)),
                    },
                    None => server.serve_connection(stream, &peer).await,
                };
                if let Err(e) = result {
                    warn!(%peer, error = %e, "connection ended with error");
                }
            });
        }
    }

    /// Drive one connection until the peer leaves, goes idle or breaks
    /// framing.
    ///
    /// Requests are answered in order. Handler failures are answered with an
    /// `Error` payload and the connection stays open.
    pub async fn serve_connection<S>(&self, stream: S, peer: &str) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(stream, FrameCodec::new(self.config.max_frame_length));
        let mut liveness = Liveness::new(
            Role::Server,
            now(),
            LivenessConfig { idle_timeout: self.config.idle_timeout, ..LivenessConfig::default() },
        );
        debug!(%peer, "connection opened");

        loop {
            let deadline = tokio::time::Instant::from_std(liveness.next_deadline());
            let next = match tokio::time::timeout_at(deadline, framed.next()).await {
                Ok(next) => next,
                Err(_) => {
                    if Self::execute(&mut framed, liveness.tick(now()), peer).await? {
                        return Ok(());
                    }
                    continue;
                },
            };

            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    warn!(%peer, error = %e, "closing connection on framing error");
                    return Err(e.into());
                },
                None => {
                    debug!(%peer, "peer closed connection");
                    return Ok(());
                },
            };

            match liveness.observe(&frame, now()) {
                Observed::Heartbeat(actions) => {
                    trace!(%peer, "heartbeat");
                    Self::execute(&mut framed, actions, peer).await?;
                },
                Observed::Application => {
                    if let Some(reply) = self.dispatch(frame, peer).await? {
                        framed.send(reply).await?;
                        liveness.record_outbound(now());
                    }
                },
            }
        }
    }

    /// Run a request on the blocking pool. `None` means no reply is due.
    async fn dispatch(&self, frame: Frame, peer: &str) -> Result<Option<Frame>, ServerError> {
        let message_type = frame.message_type();
        let registry = Arc::clone(&self.registry);

        let reply = match tokio::task::spawn_blocking(move || registry.dispatch(&frame)).await {
            Ok(Ok(reply)) => return Ok(reply),
            Ok(Err(e)) => {
                warn!(%peer, message_type, error = %e, "request failed");
                e.error_reply()
            },
            Err(e) => {
                error!(%peer, message_type, error = %e, "handler panicked");
                Payload::error(ErrorCode::Internal, "request handler panicked")
            },
        };
        Ok(Some(reply.into_frame()?))
    }

    /// Apply liveness actions. Returns `true` when the connection must close.
    async fn execute<S>(
        framed: &mut Framed<S, FrameCodec>,
        actions: Vec<LivenessAction>,
        peer: &str,
    ) -> Result<bool, ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        for action in actions {
            match action {
                LivenessAction::SendFrame(frame) => framed.send(frame).await?,
                LivenessAction::Close { reason } => {
                    info!(%peer, %reason, "closing idle connection");
                    if let Err(e) = SinkExt::<Frame>::close(framed).await {
                        trace!(%peer, error = %e, "error closing stream");
                    }
                    return Ok(true);
                },
            }
        }
        Ok(false)
    }
}
