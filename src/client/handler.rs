//! Response handlers.
//!
//! Every operation that expects a reply registers one handler. Handlers are
//! kept in send order and the head handler receives every inbound message
//! until it reports [`Handled::Complete`]. Results travel back to the
//! waiting caller through a oneshot channel.

use tokio::sync::oneshot;

use crate::backend::Row;
use crate::error::{Error, ErrorType, Result};
use crate::protocol::decoder::LobPayload;
use crate::protocol::message::{CursorDescription, Message, MessageType};
use crate::protocol::types::DataFormat;

/// Whether the head handler is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Complete,
    Continue,
}

pub trait ResponseHandler: Send {
    /// Handle one inbound message. An error aborts the connection.
    fn handle(&mut self, message: Message) -> Result<Handled>;

    /// Handle raw LOB bytes following an announcement.
    fn handle_lob(&mut self, payload: LobPayload) -> Result<Handled> {
        Err(Error::abort(
            ErrorType::UnexpectedMessage,
            format!("Received an unexpected LOB payload for '{}'", payload.id),
        ))
    }

    /// Whether this handler consumes `Ready` itself.
    fn expects_ready(&self) -> bool {
        false
    }

    /// Deliver an error to the waiting caller.
    fn fail(self: Box<Self>, error: Error);
}

fn unexpected(message: &Message, expected: &str) -> Error {
    Error::abort(
        ErrorType::UnexpectedMessage,
        format!(
            "Received {} while waiting for {}",
            message.message_type(),
            expected
        ),
    )
}

fn deliver<T>(tx: &mut Option<oneshot::Sender<Result<T>>>, result: Result<T>) {
    if let Some(tx) = tx.take() {
        // The caller may have given up waiting.
        let _ = tx.send(result);
    }
}

/// Handler completed by one message of a known type.
pub struct Reply<T> {
    expected: MessageType,
    extract: fn(Message) -> Option<T>,
    tx: Option<oneshot::Sender<Result<T>>>,
}

impl<T: Send + 'static> Reply<T> {
    pub fn new(
        expected: MessageType,
        extract: fn(Message) -> Option<T>,
    ) -> (Self, oneshot::Receiver<Result<T>>) {
        let (tx, rx) = oneshot::channel();
        let handler = Self {
            expected,
            extract,
            tx: Some(tx),
        };
        (handler, rx)
    }
}

/// Handler for a reply without content, e.g. `PrepareComplete`.
pub fn confirmation(expected: MessageType) -> (Reply<()>, oneshot::Receiver<Result<()>>) {
    Reply::new(expected, |_| Some(()))
}

impl<T: Send + 'static> ResponseHandler for Reply<T> {
    fn handle(&mut self, message: Message) -> Result<Handled> {
        if message.message_type() != self.expected {
            return Err(unexpected(&message, &self.expected.to_string()));
        }
        let value = (self.extract)(message).ok_or_else(|| {
            Error::abort(
                ErrorType::UnexpectedMessage,
                format!("Malformed {} reply", self.expected),
            )
        })?;
        deliver(&mut self.tx, Ok(value));
        Ok(Handled::Complete)
    }

    fn expects_ready(&self) -> bool {
        self.expected == MessageType::Ready
    }

    fn fail(mut self: Box<Self>, error: Error) {
        deliver(&mut self.tx, Err(error));
    }
}

/// Accumulates `RowData` until `EndOfData`.
#[derive(Default)]
struct RowCollector {
    rows: Vec<Row>,
}

impl RowCollector {
    /// Returns the rows and the `more` flag once the batch ended.
    fn accept(&mut self, message: Message) -> Result<Option<(Vec<Row>, bool)>> {
        match message {
            Message::RowData(row) => {
                self.rows.push(row.data);
                Ok(None)
            }
            Message::EndOfData(end) => Ok(Some((std::mem::take(&mut self.rows), end.more))),
            other => Err(unexpected(&other, "RowData or EndOfData")),
        }
    }
}

/// Rows of one fetch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fetched {
    pub rows: Vec<Row>,
    pub more: bool,
}

pub struct FetchHandler {
    collector: RowCollector,
    tx: Option<oneshot::Sender<Result<Fetched>>>,
}

impl FetchHandler {
    pub fn new() -> (Self, oneshot::Receiver<Result<Fetched>>) {
        let (tx, rx) = oneshot::channel();
        let handler = Self {
            collector: RowCollector::default(),
            tx: Some(tx),
        };
        (handler, rx)
    }
}

impl ResponseHandler for FetchHandler {
    fn handle(&mut self, message: Message) -> Result<Handled> {
        match self.collector.accept(message)? {
            Some((rows, more)) => {
                deliver(&mut self.tx, Ok(Fetched { rows, more }));
                Ok(Handled::Complete)
            }
            None => Ok(Handled::Continue),
        }
    }

    fn fail(mut self: Box<Self>, error: Error) {
        deliver(&mut self.tx, Err(error));
    }
}

/// Result of a query or statement execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteOutcome {
    Update(u64),
    Cursor {
        description: CursorDescription,
        /// Rows streamed together with the description
        rows: Vec<Row>,
        more: bool,
    },
}

enum ExecuteStage {
    Result,
    Rows(CursorDescription, RowCollector),
}

/// Handler for `SimpleQuery` and `ExecuteQuery`.
///
/// A simple query streams its first rows right after the cursor
/// description, in which case the handler continues as a fetch before it
/// completes.
pub struct ExecuteHandler {
    streams_rows: bool,
    stage: ExecuteStage,
    tx: Option<oneshot::Sender<Result<ExecuteOutcome>>>,
}

impl ExecuteHandler {
    pub fn new(streams_rows: bool) -> (Self, oneshot::Receiver<Result<ExecuteOutcome>>) {
        let (tx, rx) = oneshot::channel();
        let handler = Self {
            streams_rows,
            stage: ExecuteStage::Result,
            tx: Some(tx),
        };
        (handler, rx)
    }
}

impl ResponseHandler for ExecuteHandler {
    fn handle(&mut self, message: Message) -> Result<Handled> {
        match &mut self.stage {
            ExecuteStage::Result => match message {
                Message::ExecuteComplete(complete) => {
                    deliver(&mut self.tx, Ok(ExecuteOutcome::Update(complete.affected_rows)));
                    Ok(Handled::Complete)
                }
                Message::CursorDescription(description) if self.streams_rows => {
                    self.stage = ExecuteStage::Rows(description, RowCollector::default());
                    Ok(Handled::Continue)
                }
                Message::CursorDescription(description) => {
                    let outcome = ExecuteOutcome::Cursor {
                        description,
                        rows: Vec::new(),
                        more: true,
                    };
                    deliver(&mut self.tx, Ok(outcome));
                    Ok(Handled::Complete)
                }
                other => Err(unexpected(&other, "ExecuteComplete or CursorDescription")),
            },
            ExecuteStage::Rows(_, collector) => {
                let Some((rows, more)) = collector.accept(message)? else {
                    return Ok(Handled::Continue);
                };
                if let ExecuteStage::Rows(description, _) =
                    std::mem::replace(&mut self.stage, ExecuteStage::Result)
                {
                    let outcome = ExecuteOutcome::Cursor {
                        description,
                        rows,
                        more,
                    };
                    deliver(&mut self.tx, Ok(outcome));
                }
                Ok(Handled::Complete)
            }
        }
    }

    fn fail(mut self: Box<Self>, error: Error) {
        deliver(&mut self.tx, Err(error));
    }
}

/// One chunk of LOB data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobChunkReply {
    /// Total LOB size announced by the proxy
    pub size: i64,
    pub format: DataFormat,
    pub data: Vec<u8>,
}

/// Handler for `LobRequest`: an announcement, then the raw payload.
pub struct LobHandler {
    announced: Option<i64>,
    tx: Option<oneshot::Sender<Result<LobChunkReply>>>,
}

impl LobHandler {
    pub fn new() -> (Self, oneshot::Receiver<Result<LobChunkReply>>) {
        let (tx, rx) = oneshot::channel();
        let handler = Self {
            announced: None,
            tx: Some(tx),
        };
        (handler, rx)
    }
}

impl ResponseHandler for LobHandler {
    fn handle(&mut self, message: Message) -> Result<Handled> {
        match message {
            Message::LobAnnouncement(announcement) if self.announced.is_none() => {
                self.announced = Some(announcement.size);
                Ok(Handled::Continue)
            }
            other => Err(unexpected(&other, "LobAnnouncement")),
        }
    }

    fn handle_lob(&mut self, payload: LobPayload) -> Result<Handled> {
        let Some(size) = self.announced else {
            return Err(Error::abort(
                ErrorType::UnexpectedMessage,
                format!("LOB payload for '{}' arrived before its announcement", payload.id),
            ));
        };
        let chunk = LobChunkReply {
            size,
            format: payload.format,
            data: payload.data,
        };
        deliver(&mut self.tx, Ok(chunk));
        Ok(Handled::Complete)
    }

    fn fail(mut self: Box<Self>, error: Error) {
        deliver(&mut self.tx, Err(error));
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::message::{EndOfData, ExecuteComplete, LobAnnouncement, RowData};

    fn description() -> CursorDescription {
        CursorDescription {
            cursor_id: "Cursor1".into(),
            scrollable: false,
            columns: Vec::new(),
        }
    }

    #[test]
    fn reply_rejects_other_messages() {
        let (mut handler, _rx) = confirmation(MessageType::PrepareComplete);
        let err = handler.handle(Message::ReleaseComplete).unwrap_err();
        assert_eq!(err.error_type(), ErrorType::UnexpectedMessage);
        assert!(err.is_connection_broken());
    }

    #[test]
    fn simple_query_collects_streamed_rows() {
        let (mut handler, mut rx) = ExecuteHandler::new(true);
        let msgs = [
            Message::CursorDescription(description()),
            Message::RowData(RowData { data: vec![json!(1)] }),
            Message::RowData(RowData { data: vec![json!(2)] }),
        ];
        for msg in msgs {
            assert_eq!(handler.handle(msg).unwrap(), Handled::Continue);
        }
        let done = handler.handle(Message::EndOfData(EndOfData { more: true })).unwrap();
        assert_eq!(done, Handled::Complete);
        let ExecuteOutcome::Cursor { rows, more, .. } = rx.try_recv().unwrap().unwrap() else {
            panic!("expected a cursor");
        };
        assert_eq!(rows, vec![vec![json!(1)], vec![json!(2)]]);
        assert!(more);
    }

    #[test]
    fn prepared_execute_completes_on_description() {
        let (mut handler, mut rx) = ExecuteHandler::new(false);
        let done = handler.handle(Message::CursorDescription(description())).unwrap();
        assert_eq!(done, Handled::Complete);
        assert!(matches!(
            rx.try_recv().unwrap().unwrap(),
            ExecuteOutcome::Cursor { more: true, .. }
        ));

        let (mut handler, mut rx) = ExecuteHandler::new(false);
        handler
            .handle(Message::ExecuteComplete(ExecuteComplete { affected_rows: 4 }))
            .unwrap();
        assert_eq!(rx.try_recv().unwrap().unwrap(), ExecuteOutcome::Update(4));
    }

    #[test]
    fn lob_handler_needs_announcement_first() {
        let payload = LobPayload {
            id: "BLOB_1".into(),
            format: DataFormat::Binary,
            data: vec![1, 2],
        };
        let (mut handler, _rx) = LobHandler::new();
        assert!(handler.handle_lob(payload.clone()).is_err());

        let (mut handler, mut rx) = LobHandler::new();
        let announcement = Message::LobAnnouncement(LobAnnouncement {
            id: "BLOB_1".into(),
            size: 10,
        });
        assert_eq!(handler.handle(announcement).unwrap(), Handled::Continue);
        assert_eq!(handler.handle_lob(payload).unwrap(), Handled::Complete);
        let chunk = rx.try_recv().unwrap().unwrap();
        assert_eq!(chunk.size, 10);
        assert_eq!(chunk.data, vec![1, 2]);
    }

    #[test]
    fn fail_reaches_the_caller() {
        let (handler, mut rx) = FetchHandler::new();
        Box::new(handler).fail(Error::ConnectionClosed);
        assert!(matches!(rx.try_recv().unwrap(), Err(Error::ConnectionClosed)));
    }
}
