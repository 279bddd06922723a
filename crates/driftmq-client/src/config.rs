//! Pool configuration.

use std::time::Duration;

use driftmq_core::LivenessConfig;
use driftmq_proto::DEFAULT_MAX_FRAME_LENGTH;

/// Tuning for a [`crate::ConnectionPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum live connections, idle and checked out together
    pub pool_size: usize,
    /// Retries after a failed acquire attempt
    pub retry_count: u32,
    /// Pause between acquire attempts
    pub retry_interval: Duration,
    /// Upper bound on opening one connection, handshake included
    pub connect_timeout: Duration,
    /// Largest frame body accepted from or sent to the broker
    pub max_frame_length: u32,
    /// Heartbeat and idle timing for every pooled connection
    pub liveness: LivenessConfig,
    /// Identifier sent in the connect greeting
    pub client_id: String,
    /// Role hint sent in the connect greeting
    pub client_type: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            retry_count: 3,
            retry_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            liveness: LivenessConfig::default(),
            client_id: String::from("driftmq-client"),
            client_type: String::from("CLIENT"),
        }
    }
}
