//! SQP client connection.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value as JsonValue;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::buffer_pool::GLOBAL_BUFFER_POOL;
use crate::error::{Error, ErrorAction, ErrorType, Result};
use crate::opts::ClientOpts;
use crate::protocol::codec::encode_to_vec;
use crate::protocol::decoder::FrameDecoder;
use crate::protocol::frame::{Frame, read_frame, write_frames};
use crate::protocol::message::{
    ExecuteQuery, FetchData, Hello, InformationRequest, InformationResponse, LobAnnouncement,
    LobRequest, Message, MessageType, PrepareQuery, Release, SetFeature, SimpleQuery,
    TypeMapping,
};
use crate::protocol::types::{DataFormat, InformationResponseType, InformationSubject, TypeCode};
use crate::state::connection::ConnectionState;

use super::cursor::{Cursor, QueryResult};
use super::dispatch::{Dispatcher, Flow};
use super::handler::{
    ExecuteHandler, ExecuteOutcome, FetchHandler, Fetched, LobChunkReply, LobHandler, Reply,
    ResponseHandler, confirmation,
};
use super::lob::LobStream;
use super::statement::PreparedStatement;
use super::value::LobDescriptor;

/// Largest inbound frame and reassembled message accepted from the proxy.
const MAX_INBOUND_FRAME: usize = 64 * 1024 * 1024;
const MAX_INBOUND_MESSAGE: usize = 256 * 1024 * 1024;

enum Outgoing {
    Frames(Vec<Frame>),
    Shutdown,
}

#[derive(Default)]
struct OpenResources {
    cursors: BTreeSet<String>,
    statements: BTreeSet<String>,
}

struct Inner {
    opts: ClientOpts,
    dispatcher: Arc<Mutex<Dispatcher>>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    auto_commit: Mutex<bool>,
    open: Mutex<OpenResources>,
    next_cursor: AtomicU64,
    next_statement: AtomicU64,
    next_lob: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Drop for Inner {
    fn drop(&mut self) {
        let mut dispatcher = lock(&self.dispatcher);
        if dispatcher.state() == ConnectionState::Closed {
            return;
        }
        if let Ok(payload) = encode_to_vec(&Message::Close) {
            let frames = Frame::split(self.opts.format, &payload, self.opts.max_frame_size);
            let _ = self.outgoing.send(Outgoing::Frames(frames));
        }
        dispatcher.close(Error::ConnectionClosed);
        let _ = self.outgoing.send(Outgoing::Shutdown);
    }
}

/// A connection to an SQP proxy.
///
/// Operations may be issued concurrently from clones of the connection;
/// replies are matched to requests in send order.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Connect over TCP.
    pub async fn connect(opts: ClientOpts) -> Result<Self> {
        let stream = TcpStream::connect((opts.host.as_str(), opts.port)).await?;
        stream.set_nodelay(true)?;
        Self::connect_with_stream(stream, opts).await
    }

    /// Connect with an `sqp://` URL.
    pub async fn connect_url(url: &str) -> Result<Self> {
        Self::connect(ClientOpts::try_from(url)?).await
    }

    /// Run the protocol over an established transport.
    pub async fn connect_with_stream<S>(stream: S, opts: ClientOpts) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Mutex::new(Dispatcher::new()));
        lock(&dispatcher).start();
        tokio::spawn(write_loop(writer, outgoing_rx));
        tokio::spawn(read_loop(reader, Arc::clone(&dispatcher), outgoing.clone()));

        let database = opts.database.clone();
        let conn = Self {
            inner: Arc::new(Inner {
                opts,
                dispatcher,
                outgoing,
                auto_commit: Mutex::new(true),
                open: Mutex::new(OpenResources::default()),
                next_cursor: AtomicU64::new(1),
                next_statement: AtomicU64::new(1),
                next_lob: AtomicU64::new(1),
            }),
        };
        let hello = Message::Hello(Hello {
            database: database.clone(),
        });
        conn.call(hello, confirmation(MessageType::Ready)).await?;
        debug!(%database, "client: connected");
        Ok(conn)
    }

    pub fn opts(&self) -> &ClientOpts {
        &self.inner.opts
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.dispatcher).state()
    }

    pub fn is_auto_commit(&self) -> bool {
        *lock(&self.inner.auto_commit)
    }

    /// Run a query directly. Rows of a result set are streamed right away.
    pub async fn execute(&self, sql: &str) -> Result<QueryResult> {
        self.execute_with(sql, false).await
    }

    /// Run a query, optionally with a scrollable cursor.
    pub async fn execute_with(&self, sql: &str, scrollable: bool) -> Result<QueryResult> {
        let message = Message::SimpleQuery(SimpleQuery {
            query: sql.to_string(),
            cursor_id: self.next_cursor_id(),
            scrollable,
            max_fetch: self.max_fetch(),
        });
        let outcome = self.call(message, ExecuteHandler::new(true)).await?;
        Ok(self.query_result(outcome))
    }

    /// Prepare a statement with positional parameters.
    pub async fn prepare(&self, sql: &str) -> Result<PreparedStatement> {
        let id = format!(
            "Statement{}",
            self.inner.next_statement.fetch_add(1, Ordering::Relaxed)
        );
        let message = Message::PrepareQuery(PrepareQuery {
            query: sql.to_string(),
            id: id.clone(),
        });
        self.call(message, confirmation(MessageType::PrepareComplete))
            .await?;
        lock(&self.inner.open).statements.insert(id.clone());
        Ok(PreparedStatement::new(self.clone(), id, sql.to_string()))
    }

    pub async fn set_auto_commit(&self, enabled: bool) -> Result<()> {
        let message = Message::SetFeature(SetFeature {
            auto_commit: Some(enabled),
            ..SetFeature::default()
        });
        self.call(message, confirmation(MessageType::SetFeatureComplete))
            .await?;
        *lock(&self.inner.auto_commit) = enabled;
        Ok(())
    }

    /// Allow the listed native types to be used in custom-typed parameters.
    pub async fn allow_native_types(&self, types: Vec<String>) -> Result<()> {
        let message = Message::SetFeature(SetFeature {
            allowed_native_types: Some(types),
            ..SetFeature::default()
        });
        self.call(message, confirmation(MessageType::SetFeatureComplete))
            .await
    }

    pub async fn commit(&self) -> Result<()> {
        self.finish_transaction(true).await
    }

    pub async fn rollback(&self) -> Result<()> {
        self.finish_transaction(false).await
    }

    async fn finish_transaction(&self, commit: bool) -> Result<()> {
        if self.is_auto_commit() {
            let verb = if commit { "commit" } else { "roll back" };
            return Err(Error::recover(
                ErrorType::InvalidOperation,
                format!("Cannot {} while auto-commit is enabled", verb),
            ));
        }
        let message = if commit {
            Message::Commit
        } else {
            Message::Rollback
        };
        self.call(message, confirmation(MessageType::TransactionFinished))
            .await
    }

    pub async fn information(
        &self,
        subject: InformationSubject,
        detail: Option<String>,
    ) -> Result<InformationResponse> {
        let message = Message::InformationRequest(InformationRequest { subject, detail });
        let handler = Reply::new(MessageType::InformationResponse, |m| match m {
            Message::InformationResponse(response) => Some(response),
            _ => None,
        });
        self.call(message, handler).await
    }

    pub async fn supports_binary_protocol(&self) -> Result<bool> {
        let response = self
            .information(InformationSubject::SupportsBinaryProtocol, None)
            .await?;
        let value = typed_value(response, InformationResponseType::Boolean)?;
        Ok(value.as_bool().unwrap_or(false))
    }

    pub async fn dbms_name(&self) -> Result<String> {
        let response = self.information(InformationSubject::DbmsName, None).await?;
        let value = typed_value(response, InformationResponseType::Text)?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn supported_native_types(&self) -> Result<Vec<String>> {
        let response = self
            .information(InformationSubject::SupportedNativeTypes, None)
            .await?;
        let value = typed_value(response, InformationResponseType::TextArray)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Maximum precision of a type, `None` if the proxy does not know.
    pub async fn max_precision(&self, type_code: TypeCode) -> Result<Option<u64>> {
        self.type_limit(InformationSubject::MaxPrecision, type_code)
            .await
    }

    /// Maximum scale of a type, `None` if the proxy does not know.
    pub async fn max_scale(&self, type_code: TypeCode) -> Result<Option<u64>> {
        self.type_limit(InformationSubject::MaxScale, type_code)
            .await
    }

    async fn type_limit(&self, subject: InformationSubject, type_code: TypeCode) -> Result<Option<u64>> {
        let response = self
            .information(subject, Some(type_code.name().to_string()))
            .await?;
        if response.response_type == InformationResponseType::Unknown {
            return Ok(None);
        }
        let value = typed_value(response, InformationResponseType::Integer)?;
        Ok(value.as_u64())
    }

    /// JSON schema of a standard, custom or native type.
    pub async fn type_schema(&self, name: &str) -> Result<JsonValue> {
        let response = self
            .information(InformationSubject::TypeSchema, Some(name.to_string()))
            .await?;
        typed_value(response, InformationResponseType::Schema)
    }

    /// Map a custom type name onto a native type with a matching schema.
    /// Returns the native type chosen by the proxy.
    pub async fn register_type_mapping(
        &self,
        name: &str,
        schema: JsonValue,
        keywords: Vec<String>,
    ) -> Result<String> {
        let message = Message::TypeMapping(TypeMapping {
            name: name.to_string(),
            schema: Some(schema),
            keywords,
        });
        let handler = Reply::new(MessageType::TypeMappingRegistered, |m| match m {
            Message::TypeMappingRegistered(registered) => Some(registered.native),
            _ => None,
        });
        self.call(message, handler).await
    }

    /// Upload LOB data for the next statement execution.
    pub async fn upload_lob(&self, type_code: TypeCode, data: &[u8]) -> Result<LobDescriptor> {
        let (prefix, format) = match type_code {
            TypeCode::Blob => ("BLOB", DataFormat::Binary),
            TypeCode::Clob => ("CLOB", DataFormat::Text),
            other => {
                return Err(Error::InvalidUsage(format!(
                    "{} is not a LOB type",
                    other.name()
                )));
            }
        };
        let id = format!(
            "{}_{}",
            prefix,
            self.inner.next_lob.fetch_add(1, Ordering::Relaxed)
        );
        let size = i64::try_from(data.len()).unwrap_or(i64::MAX);
        let announcement = Message::LobAnnouncement(LobAnnouncement {
            id: id.clone(),
            size,
        });
        let (handler, rx) = confirmation(MessageType::LobReceived);
        self.submit(&[announcement], Some((format, data)), Box::new(handler))?;
        wait(rx).await?;
        trace!(%id, size, "client: LOB uploaded");
        Ok(LobDescriptor { id, size })
    }

    /// Stream the contents of a LOB.
    pub fn open_lob(&self, descriptor: &LobDescriptor) -> LobStream {
        LobStream::new(self.clone(), descriptor, self.inner.opts.lob_buffer_size)
    }

    /// Read one chunk of a LOB.
    pub async fn read_lob(&self, id: &str, offset: u64, size: usize) -> Result<LobChunkReply> {
        let message = Message::LobRequest(LobRequest {
            id: id.to_string(),
            offset: i64::try_from(offset).unwrap_or(i64::MAX),
            size: i64::try_from(size).unwrap_or(i64::MAX),
        });
        self.call(message, LobHandler::new()).await
    }

    /// Release cursors and statements on the proxy.
    pub async fn release(&self, cursors: Vec<String>, statements: Vec<String>) -> Result<()> {
        {
            let mut open = lock(&self.inner.open);
            for id in &cursors {
                open.cursors.remove(id);
            }
            for id in &statements {
                open.statements.remove(id);
            }
        }
        let message = Message::Release(Release {
            cursors,
            statements,
        });
        self.call(message, confirmation(MessageType::ReleaseComplete))
            .await
    }

    /// Release everything still open and close the connection. Operations
    /// still waiting for a reply fail with [`Error::ConnectionClosed`].
    pub async fn close(&self) -> Result<()> {
        let (cursors, statements) = {
            let mut open = lock(&self.inner.open);
            let open = std::mem::take(&mut *open);
            (
                open.cursors.into_iter().collect::<Vec<_>>(),
                open.statements.into_iter().collect::<Vec<_>>(),
            )
        };
        let mut result = Ok(());
        if (!cursors.is_empty() || !statements.is_empty()) && self.state().can_send() {
            result = self.release(cursors, statements).await;
        }

        let payload = encode_to_vec(&Message::Close)?;
        let frames = Frame::split(self.inner.opts.format, &payload, self.inner.opts.max_frame_size);
        {
            let mut dispatcher = lock(&self.inner.dispatcher);
            if dispatcher.state() != ConnectionState::Closed {
                let _ = self.inner.outgoing.send(Outgoing::Frames(frames));
                dispatcher.close(Error::ConnectionClosed);
            }
        }
        let _ = self.inner.outgoing.send(Outgoing::Shutdown);
        debug!("client: closed");
        result
    }

    pub(crate) async fn fetch(
        &self,
        cursor_id: &str,
        position: Option<u64>,
        count: Option<usize>,
        forward: bool,
    ) -> Result<Fetched> {
        let message = Message::FetchData(FetchData {
            cursor_id: cursor_id.to_string(),
            position: position.map_or(-1, |p| i64::try_from(p).unwrap_or(i64::MAX)),
            max_fetch: count.map_or(-1, |c| i64::try_from(c).unwrap_or(i64::MAX)),
            forward,
        });
        self.call(message, FetchHandler::new()).await
    }

    pub(crate) async fn execute_statement(&self, mut query: ExecuteQuery) -> Result<QueryResult> {
        query.cursor_id = self.next_cursor_id();
        let outcome = self
            .call(Message::ExecuteQuery(query), ExecuteHandler::new(false))
            .await?;
        Ok(self.query_result(outcome))
    }

    fn query_result(&self, outcome: ExecuteOutcome) -> QueryResult {
        match outcome {
            ExecuteOutcome::Update(affected_rows) => QueryResult::Update(affected_rows),
            ExecuteOutcome::Cursor {
                description,
                rows,
                more,
            } => {
                lock(&self.inner.open)
                    .cursors
                    .insert(description.cursor_id.clone());
                QueryResult::Cursor(Cursor::new(self.clone(), description, rows, more))
            }
        }
    }

    fn next_cursor_id(&self) -> String {
        format!(
            "Cursor{}",
            self.inner.next_cursor.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn max_fetch(&self) -> i64 {
        self.inner
            .opts
            .cursor_max_fetch
            .map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX))
    }

    async fn call<H, T>(&self, message: Message, (handler, rx): (H, oneshot::Receiver<Result<T>>)) -> Result<T>
    where
        H: ResponseHandler + 'static,
    {
        self.submit(&[message], None, Box::new(handler))?;
        wait(rx).await
    }

    /// Send messages (and raw LOB bytes) and register their handler. Both
    /// happen under the dispatcher lock so handler order equals wire order.
    fn submit(
        &self,
        messages: &[Message],
        lob: Option<(DataFormat, &[u8])>,
        handler: Box<dyn ResponseHandler>,
    ) -> Result<()> {
        let opts = &self.inner.opts;
        let mut frames = Vec::new();
        for message in messages {
            trace!(message = %message.message_type(), "client: send");
            let payload = encode_to_vec(message)?;
            frames.extend(Frame::split(opts.format, &payload, opts.max_frame_size));
        }
        if let Some((format, data)) = lob {
            frames.extend(Frame::split(format, data, opts.max_frame_size));
        }

        let mut dispatcher = lock(&self.inner.dispatcher);
        dispatcher.check_ready()?;
        self.inner
            .outgoing
            .send(Outgoing::Frames(frames))
            .map_err(|_| Error::ConnectionClosed)?;
        dispatcher.push(handler);
        Ok(())
    }
}

async fn wait<T>(rx: oneshot::Receiver<Result<T>>) -> Result<T> {
    rx.await.map_err(|_| Error::ConnectionClosed)?
}

fn typed_value(response: InformationResponse, expected: InformationResponseType) -> Result<JsonValue> {
    if response.response_type != expected || !expected.accepts(&response.value) {
        return Err(Error::recover(
            ErrorType::UnexpectedResultType,
            format!(
                "Expected a {:?} response, got {:?}",
                expected, response.response_type
            ),
        ));
    }
    Ok(response.value)
}

async fn write_loop<W: AsyncWrite + Unpin>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Outgoing>) {
    let mut buf = GLOBAL_BUFFER_POOL.get_buffer();
    while let Some(Outgoing::Frames(frames)) = rx.recv().await {
        if let Err(e) = write_frames(&mut writer, &frames, &mut buf).await {
            debug!(error = %e, "client: write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    dispatcher: Arc<Mutex<Dispatcher>>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
) {
    let mut decoder = FrameDecoder::new(MAX_INBOUND_MESSAGE);
    loop {
        let error = match read_frame(&mut reader, MAX_INBOUND_FRAME).await {
            Ok(Some(frame)) => match decoder.push(frame) {
                Ok(Some(inbound)) => {
                    if lock(&dispatcher).on_inbound(inbound) == Flow::Close {
                        break;
                    }
                    continue;
                }
                Ok(None) => continue,
                Err(e) => e.with_action(ErrorAction::Abort),
            },
            Ok(None) => Error::ConnectionClosed,
            Err(e) => e,
        };
        debug!(error = %error, "client: transport closed");
        lock(&dispatcher).close(error);
        break;
    }
    let _ = outgoing.send(Outgoing::Shutdown);
}
