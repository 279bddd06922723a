//! Broker configuration.

use std::time::Duration;

use driftmq_proto::DEFAULT_MAX_FRAME_LENGTH;

/// Listener and connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to listen on (`host:port`)
    pub bind: String,
    /// Largest frame body accepted from a client
    pub max_frame_length: u32,
    /// Close a connection after this long without inbound traffic
    pub idle_timeout: Duration,
    /// Identifier returned in connect replies
    pub server_id: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: String::from("127.0.0.1:7600"),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            idle_timeout: Duration::from_secs(90),
            server_id: String::from("driftmq"),
        }
    }
}
