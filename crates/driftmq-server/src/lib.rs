//! The driftmq broker.
//!
//! [`BrokerServer`] accepts TCP (optionally TLS) connections and drives each
//! one on its own task: frames are decoded, heartbeats answered by the
//! liveness layer, and requests dispatched to the queue handlers on the
//! blocking pool, where they call the [`driftmq_store::MessageStore`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
pub mod handlers;
mod server;

pub use config::ServerConfig;
pub use error::ServerError;
pub use server::BrokerServer;
