//! Async SQP client.
//!
//! # Structure
//!
//! - `connection`: [`Connection`] and its reader/writer tasks
//! - `dispatch`: routing of inbound messages to the response handler FIFO (sans-I/O)
//! - `handler`: response handlers per operation
//! - `cursor`: client-side cursor with on-demand fetching
//! - `statement`: prepared statements and parameter batches
//! - `lob`: streaming LOB reads
//! - `value`: decoded column values

pub mod connection;
pub mod cursor;
pub mod dispatch;
pub mod handler;
pub mod lob;
pub mod statement;
pub mod value;

pub use connection::Connection;
pub use cursor::{Cursor, QueryResult};
pub use dispatch::Dispatcher;
pub use lob::LobStream;
pub use statement::PreparedStatement;
pub use value::{FromValue, LobDescriptor, Value};
