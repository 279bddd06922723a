//! Client side of the driftmq broker protocol.
//!
//! # Components
//!
//! - [`Connection`]: one framed link with heartbeats and idle detection
//! - [`ConnectionPool`]: bounded set of connections with retrying acquire
//! - [`Client`]: produce, fetch and delete over a pool
//! - [`TcpConnector`], [`TlsConnector`]: how new connections are opened
//!
//! # Example
//!
//! ```no_run
//! use driftmq_client::{Client, ConnectionPool, PoolConfig, TcpConnector};
//! use driftmq_proto::payloads::MessageItem;
//!
//! # async fn run() -> Result<(), driftmq_client::ClientError> {
//! let config = PoolConfig::default();
//! let connector = TcpConnector::new("127.0.0.1:7600", config.connect_timeout);
//! let client = Client::new(ConnectionPool::new(connector, config));
//!
//! let item = MessageItem { message_id: "m-1".into(), body: b"hello".to_vec() };
//! let ack = client.produce("orders", vec![item]).await?;
//! assert_eq!(ack.count, 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod connection;
mod connector;
mod error;
mod pool;

pub use client::Client;
pub use config::PoolConfig;
pub use connection::Connection;
pub use connector::{TcpConnector, TlsConnector};
pub use error::{ClientError, ConnectionError, PoolError};
pub use pool::{ConnectionPool, PooledConnection};
