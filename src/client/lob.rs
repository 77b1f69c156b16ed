//! Streaming LOB reads.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

use crate::error::Result;

use super::connection::Connection;
use super::handler::LobChunkReply;
use super::value::LobDescriptor;

type ChunkFuture = Pin<Box<dyn Future<Output = Result<LobChunkReply>> + Send>>;

/// Reader over a LOB held by the proxy.
///
/// Chunks of `chunk_size` bytes are requested lazily as the reader is
/// drained. The stream ends at the announced size, or at the first empty
/// chunk when the size is unknown.
pub struct LobStream {
    conn: Connection,
    id: String,
    size: Option<u64>,
    offset: u64,
    chunk_size: usize,
    buffer: Vec<u8>,
    consumed: usize,
    pending: Option<ChunkFuture>,
    done: bool,
}

impl LobStream {
    pub(crate) fn new(conn: Connection, descriptor: &LobDescriptor, chunk_size: usize) -> Self {
        Self {
            conn,
            id: descriptor.id.clone(),
            size: u64::try_from(descriptor.size).ok(),
            offset: 0,
            chunk_size: chunk_size.max(1),
            buffer: Vec::new(),
            consumed: 0,
            pending: None,
            done: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Total size, once known.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    fn request(&mut self) -> ChunkFuture {
        let conn = self.conn.clone();
        let id = self.id.clone();
        let offset = self.offset;
        let size = match self.size {
            Some(total) => {
                let remaining = total.saturating_sub(offset);
                usize::try_from(remaining).map_or(self.chunk_size, |r| r.min(self.chunk_size))
            }
            None => self.chunk_size,
        };
        Box::pin(async move { conn.read_lob(&id, offset, size).await })
    }
}

impl AsyncRead for LobStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.consumed < this.buffer.len() {
                let available = &this.buffer[this.consumed..];
                let n = available.len().min(buf.remaining());
                buf.put_slice(&available[..n]);
                this.consumed += n;
                return Poll::Ready(Ok(()));
            }
            if this.done {
                return Poll::Ready(Ok(()));
            }
            if this.pending.is_none() {
                if this.size.is_some_and(|total| this.offset >= total) {
                    this.done = true;
                    continue;
                }
                this.pending = Some(this.request());
            }
            let Some(pending) = this.pending.as_mut() else {
                continue;
            };
            let chunk = match pending.as_mut().poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(result) => {
                    this.pending = None;
                    result.map_err(io::Error::other)?
                }
            };
            if this.size.is_none() {
                this.size = u64::try_from(chunk.size).ok();
            }
            if chunk.data.is_empty() {
                this.done = true;
                continue;
            }
            this.offset += chunk.data.len() as u64;
            this.buffer = chunk.data;
            this.consumed = 0;
        }
    }
}
