//! Per-connection driver.
//!
//! Three tasks cooperate on one client connection: the reader decodes
//! frames, the session loop (this module) feeds events into the
//! [`Session`] and performs its effects, and the executor runs backend
//! work. All session input arrives on one channel, so the state machine
//! only ever sees one event at a time.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::buffer_pool::GLOBAL_BUFFER_POOL;
use crate::error::{Error, ErrorAction, Result};
use crate::opts::ProxyOpts;
use crate::pool::{ConnectionPool, PooledConnection};
use crate::protocol::codec::encode_message;
use crate::protocol::decoder::{FrameDecoder, Inbound};
use crate::protocol::frame::{Frame, Opcode, read_frame, write_frames};
use crate::protocol::types::DataFormat;
use crate::state::action::{BackendRequest, Completion, Effect};
use crate::state::session::SessionState;

use super::executor::Executor;
use super::info::TypeCatalog;
use super::session::Session;

/// Input of the session loop.
pub enum SessionEvent {
    /// A decoded item and the format it arrived in
    Inbound(Inbound, DataFormat),
    /// A frame that could not be decoded and its format
    DecodeFailed(Error, DataFormat),
    ClientClosed,
    Connected(Result<PooledConnection>),
    Completed(Result<Completion>),
}

/// Serve one client connection until it closes.
pub async fn serve_connection<S>(stream: S, pool: Arc<ConnectionPool>, opts: ProxyOpts) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let reader_task = tokio::spawn(read_loop(
        reader,
        opts.max_frame_size,
        opts.max_message_size,
        events_tx.clone(),
    ));

    let mut session = Session::new(TypeCatalog::new(pool.backend().type_repository()));
    let mut executor: Option<mpsc::UnboundedSender<BackendRequest>> = None;
    let mut connect_task: Option<JoinHandle<()>> = None;
    let mut buf = GLOBAL_BUFFER_POOL.get_buffer();
    let mut payload = Vec::new();

    let result = 'session: loop {
        while let Some(effect) = session.next_effect() {
            let frames = match effect {
                Effect::Send(message, format) => {
                    trace!(message = %message.message_type(), "proxy: send");
                    payload.clear();
                    if let Err(e) = encode_message(&message, &mut payload) {
                        error!(error = %e, "proxy: cannot encode reply");
                        break 'session Err(e);
                    }
                    Frame::split(format, &payload, opts.max_frame_size)
                }
                Effect::SendLob(lob) => Frame::split(lob.format, &lob.data, opts.max_frame_size),
                Effect::Connect { database } => {
                    match pool.acquire(&database) {
                        Ok(mut ticket) => {
                            let tx = events_tx.clone();
                            connect_task = Some(tokio::spawn(async move {
                                let result = ticket.wait().await;
                                let _ = tx.send(SessionEvent::Connected(result));
                            }));
                        }
                        Err(e) => session.connected(Err(e)),
                    }
                    continue;
                }
                Effect::Dispatch(request) => {
                    let sent = executor.as_ref().is_some_and(|tx| tx.send(request).is_ok());
                    if !sent {
                        session.backend_disconnected("The backend connection is gone");
                    }
                    continue;
                }
                Effect::Close => break 'session Ok(()),
            };
            if let Err(e) = write_frames(&mut writer, &frames, &mut buf).await {
                debug!(error = %e, "proxy: write failed");
                break 'session Err(e);
            }
        }

        let Some(event) = events.recv().await else {
            break Ok(());
        };
        match event {
            SessionEvent::Inbound(inbound, format) => session.receive(inbound, format),
            SessionEvent::DecodeFailed(e, format) => session.decode_failed(e, format),
            SessionEvent::ClientClosed => session.client_closed(),
            SessionEvent::Connected(Ok(conn)) => {
                if session.state() != SessionState::Connecting {
                    continue;
                }
                debug!(id = conn.id(), "proxy: backend connection acquired");
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(Executor::new(conn, &opts).run(rx, events_tx.clone()));
                executor = Some(tx);
                session.connected(Ok(()));
            }
            SessionEvent::Connected(Err(e)) => session.connected(Err(e)),
            SessionEvent::Completed(result) => session.complete(result),
        }
    };

    // Dropping the request sender lets the executor release everything.
    drop(executor);
    if let Some(task) = connect_task {
        task.abort();
    }
    reader_task.abort();
    let _ = writer.shutdown().await;
    debug!(ok = result.is_ok(), "proxy: connection closed");
    result
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    max_frame_size: usize,
    max_message_size: usize,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut decoder = FrameDecoder::new(max_message_size);
    let mut format = DataFormat::Text;
    loop {
        let event = match read_frame(&mut reader, max_frame_size).await {
            Ok(Some(frame)) => {
                match frame.opcode {
                    Opcode::Text => format = DataFormat::Text,
                    Opcode::Binary => format = DataFormat::Binary,
                    Opcode::Continuation => {}
                }
                match decoder.push(frame) {
                    Ok(Some(inbound)) => SessionEvent::Inbound(inbound, format),
                    Ok(None) => continue,
                    Err(e) => SessionEvent::DecodeFailed(e, format),
                }
            }
            Ok(None) => {
                let _ = events.send(SessionEvent::ClientClosed);
                return;
            }
            Err(Error::Io(e)) => {
                debug!(error = %e, "proxy: read failed");
                let _ = events.send(SessionEvent::ClientClosed);
                return;
            }
            Err(e) => {
                // The frame boundary is lost, nothing after it can be trusted.
                let _ = events.send(SessionEvent::DecodeFailed(
                    e.with_action(ErrorAction::Abort),
                    format,
                ));
                return;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }
}
