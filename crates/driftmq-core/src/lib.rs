//! driftmq connection-side logic
//!
//! Everything in this crate is independent of sockets and runtimes. Time is
//! supplied by the caller, frames come in as decoded values, and side
//! effects are returned as actions for a driver to execute.
//!
//! # Components
//!
//! - [`liveness`]: Heartbeat and idle-timeout state machine (client and server roles)
//! - [`dispatch`]: Message type to handler registration table
//! - [`transport`]: Transport abstraction for outbound connections
//! - [`error`]: Handler and dispatch error types

pub mod dispatch;
pub mod error;
pub mod liveness;
pub mod transport;

pub use dispatch::{FrameHandler, HandlerRegistry};
pub use error::{DispatchError, HandlerError};
pub use liveness::{Liveness, LivenessAction, LivenessConfig, LivenessState, Observed, Role};
pub use transport::Connector;
