//! Effects requested by the session state machine.

use crate::backend::{FeatureSetting, InformationResult, LobChunk, Parameter, Row};
use crate::protocol::decoder::LobPayload;
use crate::protocol::message::{CursorDescription, Message};
use crate::protocol::types::{DataFormat, InformationSubject};

/// Effect requested by the session.
///
/// The driver performs the effect and feeds the outcome back into the
/// session (`connected`, `complete`).
#[derive(Debug)]
pub enum Effect {
    /// Send a message to the client in the format of the request it answers.
    Send(Message, DataFormat),

    /// Send raw LOB bytes as the payload following a `LobAnnouncement`.
    SendLob(LobPayload),

    /// Acquire a backend connection for `database` from the pool.
    Connect { database: String },

    /// Run a request on the backend connection, then call `complete()`.
    Dispatch(BackendRequest),

    /// Release the backend connection and close the transport.
    Close,
}

/// Work for the backend executor.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendRequest {
    /// Execute and stream up to `max_fetch` rows (all if `None`).
    SimpleQuery {
        sql: String,
        cursor_id: String,
        scrollable: bool,
        max_fetch: Option<usize>,
    },
    Prepare {
        statement_id: String,
        sql: String,
    },
    Execute {
        statement_id: String,
        cursor_id: String,
        scrollable: bool,
        parameters: Vec<Vec<Parameter>>,
    },
    /// `position` and `count` of `None` mean the current position and
    /// everything buffered.
    Fetch {
        cursor_id: String,
        position: Option<u64>,
        count: Option<usize>,
        forward: bool,
    },
    Release {
        cursors: Vec<String>,
        statements: Vec<String>,
    },
    SetFeatures(Vec<FeatureSetting>),
    Commit,
    Rollback,
    Information {
        subject: InformationSubject,
        detail: Option<String>,
    },
    GetLob {
        id: String,
        offset: u64,
        length: Option<u64>,
    },
}

/// Successful outcome of a [`BackendRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Statement changed rows
    Update(u64),
    /// Statement opened a cursor; rows follow on `FetchData`
    CursorOpened(CursorDescription),
    /// Simple query result with its first rows
    Query {
        description: CursorDescription,
        rows: Vec<Row>,
        more: bool,
    },
    Fetched {
        rows: Vec<Row>,
        more: bool,
    },
    Prepared,
    Released,
    FeaturesSet,
    TransactionFinished,
    Information(InformationResult),
    Lob(LobChunk),
}
