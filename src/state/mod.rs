//! Sans-I/O state tables for SQP connections.
//!
//! These types hold the protocol rules without performing any I/O. The
//! proxy session produces [`Effect`] values that tell the driver what to do
//! next.

pub mod action;
pub mod connection;
pub mod session;

pub use action::{BackendRequest, Completion, Effect};
pub use connection::ConnectionState;
pub use session::{Disposition, InboundKind, SessionState};
