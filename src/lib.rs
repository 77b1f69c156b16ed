//! SQP: a database-access protocol between clients and a proxy that fronts
//! a database backend.
//!
//! # Features
//!
//! - **Sans-I/O state machines**: the proxy session and the client dispatcher
//!   hold the protocol rules; tokio drivers only move bytes
//! - **Pipelining**: clients may send any number of requests; replies are
//!   matched in FIFO order
//! - **Cursors**: forward-only and scrollable, buffered on the proxy
//! - **LOBs**: raw side-channel payloads announced by a message
//! - **Bounded pool**: backend connections with a deferred request queue
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sqp::backend::{MemoryBackend, Scripted};
//! use sqp::client::Connection;
//! use sqp::opts::{ClientOpts, ProxyOpts};
//! use sqp::proxy::Proxy;
//!
//! # async fn example() -> sqp::Result<()> {
//! let backend = MemoryBackend::new().with_query("DELETE FROM t", Scripted::Update(3));
//! let proxy = Proxy::new(ProxyOpts::default(), Arc::new(backend));
//! let (client, server) = tokio::io::duplex(64 * 1024);
//! proxy.spawn_connection(server);
//!
//! let conn = Connection::connect_with_stream(client, ClientOpts::default()).await?;
//! let result = conn.execute("DELETE FROM t").await?;
//! assert_eq!(result.affected_rows(), Some(3));
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod buffer_pool;
pub mod client;
pub mod error;
pub mod opts;
pub mod pool;
pub mod protocol;
pub mod proxy;
pub mod state;

pub use client::{Connection, Cursor, PreparedStatement, QueryResult, Value};
pub use error::{Error, ErrorAction, ErrorType, Result, ServerError};
pub use opts::{ClientOpts, ProxyOpts};
pub use proxy::Proxy;
