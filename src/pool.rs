//! Bounded backend connection pool with a deferred request queue.
//!
//! Up to `capacity` connections are active at once and up to `capacity`
//! further requests wait in FIFO order. Anything beyond that is rejected.
//! `acquire` never blocks: it hands out a [`PoolTicket`] that resolves once
//! the connection is connected.

use std::collections::{HashSet, VecDeque};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::backend::{Backend, BackendConnection};
use crate::error::{Error, ErrorType, Result};

type Grant = oneshot::Sender<Result<PooledConnection>>;

struct PendingRequest {
    id: u64,
    database: String,
    tx: Grant,
}

#[derive(Default)]
struct PoolState {
    next_id: u64,
    active: HashSet<u64>,
    queue: VecDeque<PendingRequest>,
}

/// Pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub active: usize,
    pub queued: usize,
    pub capacity: usize,
}

/// Connection pool shared by all sessions of a proxy.
pub struct ConnectionPool {
    backend: Arc<dyn Backend>,
    capacity: usize,
    state: Mutex<PoolState>,
}

impl ConnectionPool {
    pub fn new(backend: Arc<dyn Backend>, capacity: usize) -> Self {
        Self {
            backend,
            capacity,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request a connection to `database`.
    ///
    /// Connects right away if a slot is free, queues the request otherwise.
    /// Fails with an `OverloadedServer` abort if the queue is full too.
    /// Must be called within a tokio runtime.
    pub fn acquire(self: &Arc<Self>, database: &str) -> Result<PoolTicket> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        let id = state.next_id;
        if state.active.len() < self.capacity {
            state.next_id += 1;
            state.active.insert(id);
            drop(state);
            debug!(id, database, "pool: connecting");
            self.instantiate(id, database.to_string(), tx);
        } else if state.queue.len() < self.capacity {
            state.next_id += 1;
            state.queue.push_back(PendingRequest {
                id,
                database: database.to_string(),
                tx,
            });
            debug!(id, database, queued = state.queue.len(), "pool: request deferred");
        } else {
            warn!(database, "pool: overloaded, request rejected");
            return Err(Error::abort(
                ErrorType::OverloadedServer,
                "The server cannot accept more connections at the moment",
            ));
        }
        Ok(PoolTicket {
            id,
            pool: Arc::clone(self),
            rx: Some(rx),
        })
    }

    fn instantiate(self: &Arc<Self>, id: u64, database: String, tx: Grant) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let result = match pool.backend.create_connection() {
                Ok(conn) => {
                    let conn: Arc<dyn BackendConnection> = Arc::from(conn);
                    conn.connect(&database).await.map(|()| conn)
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(conn) => {
                    let pooled = PooledConnection {
                        id,
                        pool: Arc::clone(&pool),
                        conn,
                        closed: false,
                    };
                    // A dropped ticket hands the connection back; its drop releases the slot.
                    let _ = tx.send(Ok(pooled));
                }
                Err(e) => {
                    debug!(id, error = %e, "pool: connect failed");
                    pool.release(id);
                    let _ = tx.send(Err(e));
                }
            }
        });
    }

    /// Free the slot or queue entry of `id` and promote the oldest queued request.
    pub fn release(self: &Arc<Self>, id: u64) {
        let mut state = self.lock();
        if !state.active.remove(&id) {
            state.queue.retain(|request| request.id != id);
            return;
        }
        let Some(next) = state.queue.pop_front() else {
            debug!(id, "pool: released");
            return;
        };
        state.active.insert(next.id);
        drop(state);
        debug!(id, next = next.id, "pool: released, promoting queued request");
        self.instantiate(next.id, next.database, next.tx);
    }

    fn cancel(&self, id: u64) {
        self.lock().queue.retain(|request| request.id != id);
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            active: state.active.len(),
            queued: state.queue.len(),
            capacity: self.capacity,
        }
    }
}

/// Pending acquisition.
///
/// Dropping an unredeemed ticket withdraws the request.
pub struct PoolTicket {
    id: u64,
    pool: Arc<ConnectionPool>,
    rx: Option<oneshot::Receiver<Result<PooledConnection>>>,
}

impl std::fmt::Debug for PoolTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolTicket").field("id", &self.id).finish()
    }
}

impl PoolTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait until the connection is connected.
    pub async fn wait(&mut self) -> Result<PooledConnection> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(Error::InvalidUsage("Pool ticket already redeemed".into()));
        };
        let result = rx.await;
        self.rx = None;
        result.unwrap_or_else(|_| {
            Err(Error::abort(
                ErrorType::DatabaseConnection,
                "The connection request was dropped",
            ))
        })
    }
}

impl Drop for PoolTicket {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        rx.close();
        if let Ok(result) = rx.try_recv() {
            // A delivered connection releases its slot when dropped.
            drop(result);
        } else {
            self.pool.cancel(self.id);
        }
    }
}

/// A connected backend connection holding a pool slot.
///
/// Dropping it closes the connection in the background and frees the slot.
pub struct PooledConnection {
    id: u64,
    pool: Arc<ConnectionPool>,
    conn: Arc<dyn BackendConnection>,
    closed: bool,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish()
    }
}

impl PooledConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Close the backend connection and free the slot.
    pub async fn close(mut self) -> Result<()> {
        self.closed = true;
        let result = self.conn.close().await;
        self.pool.release(self.id);
        result
    }
}

impl Deref for PooledConnection {
    type Target = dyn BackendConnection;
    fn deref(&self) -> &Self::Target {
        &*self.conn
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let id = self.id;
        let pool = Arc::clone(&self.pool);
        let conn = Arc::clone(&self.conn);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = conn.close().await {
                        warn!(id, error = %e, "pool: closing connection failed");
                    }
                    pool.release(id);
                });
            }
            Err(_) => pool.release(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn pool(capacity: usize) -> (MemoryBackend, Arc<ConnectionPool>) {
        let backend = MemoryBackend::new();
        let pool = Arc::new(ConnectionPool::new(Arc::new(backend.clone()), capacity));
        (backend, pool)
    }

    #[tokio::test]
    async fn queued_requests_are_served_in_order() {
        let (_, pool) = pool(2);
        let mut a = pool.acquire("db").unwrap();
        let mut b = pool.acquire("db").unwrap();
        let conn_a = a.wait().await.unwrap();
        let _conn_b = b.wait().await.unwrap();

        let mut c = pool.acquire("db").unwrap();
        let d = pool.acquire("db").unwrap();
        assert_eq!(
            pool.stats(),
            PoolStats {
                active: 2,
                queued: 2,
                capacity: 2
            }
        );
        let err = pool.acquire("db").unwrap_err();
        assert_eq!(err.error_type(), ErrorType::OverloadedServer);
        assert!(err.is_connection_broken());

        conn_a.close().await.unwrap();
        let conn_c = c.wait().await.unwrap();
        assert_eq!(conn_c.id(), c.id());
        assert!(c.id() < d.id());
        assert_eq!(pool.stats().queued, 1);
    }

    #[tokio::test]
    async fn ids_are_never_reused() {
        let (_, pool) = pool(1);
        let mut first = pool.acquire("db").unwrap();
        let conn = first.wait().await.unwrap();
        conn.close().await.unwrap();
        let second = pool.acquire("db").unwrap();
        assert!(second.id() > first.id());
    }

    #[tokio::test]
    async fn dropped_ticket_leaves_the_queue() {
        let (_, pool) = pool(1);
        let mut a = pool.acquire("db").unwrap();
        let _conn = a.wait().await.unwrap();
        let queued = pool.acquire("db").unwrap();
        assert_eq!(pool.stats().queued, 1);
        drop(queued);
        assert_eq!(pool.stats().queued, 0);
    }

    #[tokio::test]
    async fn failed_connect_frees_the_slot() {
        let backend = MemoryBackend::new().with_failing_connect();
        let pool = Arc::new(ConnectionPool::new(Arc::new(backend), 1));
        let mut ticket = pool.acquire("db").unwrap();
        let err = ticket.wait().await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::DatabaseConnection);
        assert_eq!(pool.stats().active, 0);
    }

    #[tokio::test]
    async fn dropping_a_connection_closes_it() {
        let (backend, pool) = pool(1);
        let mut ticket = pool.acquire("db").unwrap();
        let conn = ticket.wait().await.unwrap();
        assert_eq!(backend.open_connections(), 1);
        drop(conn);
        tokio::task::yield_now().await;
        assert_eq!(backend.open_connections(), 0);
        assert_eq!(pool.stats().active, 0);
    }
}
