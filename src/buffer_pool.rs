//! Write buffer pool shared by proxy and client connections.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, LazyLock};

use crossbeam_queue::ArrayQueue;

const POOL_CAPACITY: usize = 128;

/// Buffers grown past this are not kept.
const MAX_RETAINED_CAPACITY: usize = 1024 * 1024;

/// Global buffer pool for reusing frame buffers across connections.
pub static GLOBAL_BUFFER_POOL: LazyLock<Arc<BufferPool>> =
    LazyLock::new(|| Arc::new(BufferPool::default()));

/// A pooled buffer that returns itself to the pool on drop.
pub struct PooledBuffer {
    pool: Arc<BufferPool>,
    inner: Vec<u8>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.inner);
        self.pool.return_buffer(buffer);
    }
}

#[derive(Debug)]
pub struct BufferPool {
    buffers: ArrayQueue<Vec<u8>>,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: ArrayQueue::new(capacity),
        }
    }

    /// Get a buffer from the pool, or create a new one if empty.
    pub fn get_buffer(self: &Arc<Self>) -> PooledBuffer {
        PooledBuffer {
            pool: Arc::clone(self),
            inner: self.buffers.pop().unwrap_or_default(),
        }
    }

    fn return_buffer(&self, mut buffer: Vec<u8>) {
        if buffer.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        // Clear but preserve capacity
        buffer.clear();
        // Ignore if pool is full
        let _ = self.buffers.push(buffer);
    }

    /// Number of idle buffers.
    pub fn idle(&self) -> usize {
        self.buffers.len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(POOL_CAPACITY)
    }
}
