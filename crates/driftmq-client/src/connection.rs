//! A single framed connection to the broker.
//!
//! The connection drives a client-role [`Liveness`] state machine: while
//! waiting for a reply it wakes at the liveness deadline, sends a heartbeat
//! when the link has been quiet, and gives up once the broker has been
//! silent for the idle timeout. Heartbeat replies never surface to callers.

use std::time::Instant;

use driftmq_core::{Liveness, LivenessAction, LivenessConfig, Observed, Role};
use driftmq_proto::{
    Frame, FrameCodec, Payload,
    payloads::{ConnectRequest, ConnectResponse},
};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::error::ConnectionError;

/// Current time on the runtime clock, so paused test time applies.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Framed transport plus liveness state.
#[derive(Debug)]
pub struct Connection<S> {
    framed: Framed<S, FrameCodec>,
    liveness: Liveness,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established stream.
    pub fn new(stream: S, max_frame_length: u32, liveness: LivenessConfig) -> Self {
        Self {
            framed: Framed::new(stream, FrameCodec::new(max_frame_length)),
            liveness: Liveness::new(Role::Client, now(), liveness),
        }
    }

    /// Whether the connection is still usable.
    pub fn is_active(&self) -> bool {
        self.liveness.is_active()
    }

    /// Write one frame.
    pub async fn send(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        if !self.is_active() {
            return Err(ConnectionError::Closed);
        }

        if let Err(e) = self.framed.send(frame).await {
            self.liveness.close();
            return Err(e.into());
        }
        self.liveness.record_outbound(now());
        Ok(())
    }

    /// Read the next application frame.
    ///
    /// Heartbeats are absorbed, and heartbeats are sent while waiting.
    pub async fn recv(&mut self) -> Result<Frame, ConnectionError> {
        loop {
            if !self.is_active() {
                return Err(ConnectionError::Closed);
            }

            let deadline = tokio::time::Instant::from_std(self.liveness.next_deadline());
            let next = match tokio::time::timeout_at(deadline, self.framed.next()).await {
                Ok(next) => next,
                Err(_) => {
                    self.tick().await?;
                    continue;
                },
            };

            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    self.liveness.close();
                    return Err(e.into());
                },
                None => {
                    self.liveness.close();
                    return Err(ConnectionError::Closed);
                },
            };

            match self.liveness.observe(&frame, now()) {
                Observed::Application => return Ok(frame),
                Observed::Heartbeat(actions) => {
                    trace!("heartbeat reply");
                    self.execute(actions).await?;
                },
            }
        }
    }

    /// Send `payload` and wait for its reply.
    pub async fn request(&mut self, payload: Payload) -> Result<Payload, ConnectionError> {
        self.send(payload.into_frame()?).await?;
        let reply = self.recv().await?;
        Ok(Payload::from_frame(&reply)?)
    }

    /// Greet the broker. Fails unless the broker accepts.
    pub async fn handshake(
        &mut self,
        client_id: &str,
        client_type: &str,
    ) -> Result<ConnectResponse, ConnectionError> {
        let request = Payload::ConnectRequest(ConnectRequest {
            client_id: client_id.to_owned(),
            client_type: client_type.to_owned(),
            client_version: env!("CARGO_PKG_VERSION").to_owned(),
        });

        match self.request(request).await? {
            Payload::ConnectResponse(response) if response.success => {
                debug!(server_id = %response.server_id, "handshake complete");
                Ok(response)
            },
            Payload::ConnectResponse(response) => {
                self.liveness.close();
                Err(ConnectionError::Rejected(response.message))
            },
            Payload::Error(reply) => {
                self.liveness.close();
                Err(ConnectionError::Rejected(reply.message))
            },
            other => {
                self.liveness.close();
                Err(ConnectionError::UnexpectedReply(other.message_type().to_u8()))
            },
        }
    }

    /// Run due liveness work for a connection nobody is reading from.
    ///
    /// Frames the broker already sent (heartbeat replies) are consumed
    /// without waiting, then a heartbeat is sent if the link is quiet, or the
    /// connection is closed if the broker has gone silent.
    pub async fn keepalive(&mut self) -> Result<(), ConnectionError> {
        while let Some(next) = self.framed.next().now_or_never() {
            match next {
                Some(Ok(frame)) => match self.liveness.observe(&frame, now()) {
                    Observed::Heartbeat(actions) => self.execute(actions).await?,
                    Observed::Application => {
                        let message_type = frame.message_type();
                        warn!(message_type, "unsolicited frame on idle connection");
                    },
                },
                Some(Err(e)) => {
                    self.liveness.close();
                    return Err(e.into());
                },
                None => {
                    self.liveness.close();
                    return Err(ConnectionError::Closed);
                },
            }
        }

        self.tick().await
    }

    async fn tick(&mut self) -> Result<(), ConnectionError> {
        let actions = self.liveness.tick(now());
        self.execute(actions).await
    }

    async fn execute(&mut self, actions: Vec<LivenessAction>) -> Result<(), ConnectionError> {
        for action in actions {
            match action {
                LivenessAction::SendFrame(frame) => {
                    trace!("sending heartbeat");
                    if let Err(e) = self.framed.send(frame).await {
                        self.liveness.close();
                        return Err(e.into());
                    }
                },
                LivenessAction::Close { reason } => {
                    warn!(%reason, "closing idle connection");
                    self.shutdown().await;
                    return Err(ConnectionError::IdleTimeout(self.liveness.config().idle_timeout));
                },
            }
        }
        Ok(())
    }

    /// Close the connection. Idempotent.
    pub async fn close(&mut self) {
        self.liveness.close();
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        if let Err(e) = SinkExt::<Frame>::close(&mut self.framed).await {
            trace!(error = %e, "error closing stream");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use driftmq_proto::{
        MessageType,
        payloads::{Fetch, FetchResponse},
    };
    use tokio::io::DuplexStream;

    use super::*;

    fn pair() -> (Connection<DuplexStream>, Framed<DuplexStream, FrameCodec>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let conn = Connection::new(client, 1024 * 1024, LivenessConfig::default());
        (conn, Framed::new(server, FrameCodec::default()))
    }

    async fn reply(server: &mut Framed<DuplexStream, FrameCodec>, payload: Payload) {
        server.send(payload.into_frame().unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn handshake_accepted() {
        let (mut conn, mut server) = pair();

        let broker = tokio::spawn(async move {
            let frame = server.next().await.unwrap().unwrap();
            let Payload::ConnectRequest(req) = Payload::from_frame(&frame).unwrap() else {
                unreachable!("expected connect request");
            };
            assert_eq!(req.client_id, "c-1");
            reply(
                &mut server,
                Payload::ConnectResponse(ConnectResponse {
                    success: true,
                    message: "welcome".into(),
                    server_id: "b-1".into(),
                }),
            )
            .await;
            server
        });

        let response = conn.handshake("c-1", "PRODUCER").await.unwrap();
        assert_eq!(response.server_id, "b-1");
        assert!(conn.is_active());
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_rejected() {
        let (mut conn, mut server) = pair();

        let broker = tokio::spawn(async move {
            let _ = server.next().await;
            reply(
                &mut server,
                Payload::ConnectResponse(ConnectResponse {
                    success: false,
                    message: "go away".into(),
                    server_id: "b-1".into(),
                }),
            )
            .await;
            server
        });

        let err = conn.handshake("c-1", "PRODUCER").await.unwrap_err();
        assert!(matches!(err, ConnectionError::Rejected(msg) if msg == "go away"));
        assert!(!conn.is_active());
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn heartbeats_are_absorbed() {
        let (mut conn, mut server) = pair();

        server.send(Frame::heartbeat()).await.unwrap();
        let empty = FetchResponse { queue: "q".into(), messages: vec![] };
        reply(&mut server, Payload::FetchResponse(empty)).await;

        let frame = conn.recv().await.unwrap();
        assert_eq!(frame.message_type_enum(), Some(MessageType::FetchResponse));
    }

    #[tokio::test]
    async fn peer_close_is_reported() {
        let (mut conn, server) = pair();
        drop(server);

        let err = conn.request(Payload::Fetch(Fetch { queue: "q".into() })).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Protocol(_) | ConnectionError::Closed));
        assert!(!conn.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_broker_times_out_after_heartbeats() {
        let (mut conn, mut server) = pair();
        let start = tokio::time::Instant::now();

        let err = conn.recv().await.unwrap_err();
        assert!(matches!(err, ConnectionError::IdleTimeout(_)));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(90) && elapsed < Duration::from_secs(91));

        // Two heartbeats went out (at 30s and 60s) before the timeout
        let mut heartbeats = 0;
        while let Some(Ok(frame)) = server.next().await {
            assert!(frame.is_heartbeat());
            heartbeats += 1;
        }
        assert_eq!(heartbeats, 2);
    }
}
