//! SQP proxy.
//!
//! # Structure
//!
//! - `session`: the per-connection state machine (sans-I/O)
//! - `cursor`: server-side buffered cursor
//! - `registry`: open statements and cursors of a session
//! - `params`: `ExecuteQuery` parameter decoding
//! - `info`: information requests and custom type mappings
//! - `schema`: custom type schema compatibility and value checks
//! - `executor`: task running backend work for one session
//! - `connection`: tokio driver tying reader, session and executor together

pub mod connection;
pub mod cursor;
pub mod executor;
pub mod info;
pub mod params;
pub mod registry;
pub mod schema;
pub mod session;

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::error::Result;
use crate::opts::ProxyOpts;
use crate::pool::ConnectionPool;

pub use connection::serve_connection;
pub use cursor::BufferedCursor;
pub use session::{Session, TransactionMode};

/// Proxy serving SQP clients from one backend.
pub struct Proxy {
    opts: ProxyOpts,
    pool: Arc<ConnectionPool>,
}

impl Proxy {
    pub fn new(opts: ProxyOpts, backend: Arc<dyn Backend>) -> Self {
        let pool = Arc::new(ConnectionPool::new(backend, opts.pool_size));
        Self { opts, pool }
    }

    pub fn opts(&self) -> &ProxyOpts {
        &self.opts
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Serve a client connection on its own task.
    pub fn spawn_connection<S>(&self, stream: S) -> JoinHandle<Result<()>>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        let opts = self.opts.clone();
        tokio::spawn(async move {
            let result = serve_connection(stream, pool, opts).await;
            if let Err(e) = &result {
                warn!(error = %e, "proxy: connection failed");
            }
            result
        })
    }

    /// Accept connections until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            stream.set_nodelay(true)?;
            debug!(%addr, "proxy: accepted connection");
            self.spawn_connection(stream);
        }
    }
}
