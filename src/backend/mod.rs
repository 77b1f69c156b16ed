//! Backend collaborator interface.
//!
//! A backend adapter translates SQP operations into a database driver's
//! calls. Every operation returns a `'static` future so the proxy can run it
//! on its worker task while the session keeps receiving frames.
//!
//! Statements and cursors are addressed by the client-assigned ids; the
//! adapter keeps the native handles. Buffering of cursor rows, id reuse and
//! deferred statement close are handled by the proxy, so `fetch` only pulls
//! the next rows from the native cursor.

mod memory;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::protocol::message::InformationResponse;
use crate::protocol::types::{ColumnMetadata, DataFormat, InformationSubject, TypeCode};

pub use memory::{MemoryBackend, Scripted};

/// Future returned by backend operations.
pub type BackendFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'static>>;

/// One result row, one JSON value per column.
pub type Row = Vec<JsonValue>;

/// Outcome of executing a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteResult {
    /// Number of affected rows
    Update(u64),
    /// A native cursor was opened under the requested cursor id
    Rows(Vec<ColumnMetadata>),
}

/// Rows pulled from a native cursor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowBatch {
    pub rows: Vec<Row>,
    /// Whether the native cursor has rows left
    pub more: bool,
}

/// A feature change requested through `SetFeature` or a type mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureSetting {
    AutoCommit(bool),
    AllowNativeTypes(Vec<String>),
}

/// A decoded statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub type_code: TypeCode,
    /// Native type of a custom-typed parameter
    pub native_type: Option<String>,
    pub value: ParameterValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Null,
    Json(JsonValue),
    /// LOB received on the session before the execute
    Lob { id: String, data: Arc<[u8]> },
}

/// Answer of a backend to an information request.
#[derive(Debug, Clone, PartialEq)]
pub enum InformationResult {
    Answer(InformationResponse),
    /// The backend does not know; the proxy falls back to defaults
    Unknown,
}

/// A piece of a LOB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobChunk {
    /// Text for character LOBs, binary otherwise
    pub format: DataFormat,
    /// Total size of the LOB; negative if unknown
    pub total_size: i64,
    pub data: Vec<u8>,
}

/// Native type metadata of a backend.
pub trait TypeRepository: Send + Sync {
    /// Names of the native types the backend supports.
    fn native_types(&self) -> Vec<String>;

    /// JSON schema describing values of a native type.
    fn schema(&self, native_type: &str) -> Option<JsonValue>;
}

/// A live database session.
pub trait BackendConnection: Send + Sync {
    /// Connect to the given database.
    fn connect(&self, database: &str) -> BackendFuture<()>;

    /// Execute a query without preparing it.
    fn simple_query(&self, sql: &str, cursor_id: &str, scrollable: bool)
    -> BackendFuture<ExecuteResult>;

    /// Prepare `sql` under `statement_id`.
    fn prepare(&self, statement_id: &str, sql: &str) -> BackendFuture<()>;

    /// Execute a prepared statement with one parameter list per batch.
    fn execute(
        &self,
        statement_id: &str,
        cursor_id: &str,
        scrollable: bool,
        parameters: Vec<Vec<Parameter>>,
    ) -> BackendFuture<ExecuteResult>;

    /// Pull up to `max_rows` rows (all if `None`) from a native cursor.
    fn fetch(&self, cursor_id: &str, max_rows: Option<usize>) -> BackendFuture<RowBatch>;

    fn close_cursor(&self, cursor_id: &str) -> BackendFuture<()>;

    fn close_statement(&self, statement_id: &str) -> BackendFuture<()>;

    fn set_features(&self, settings: Vec<FeatureSetting>) -> BackendFuture<()>;

    fn commit(&self) -> BackendFuture<()>;

    fn rollback(&self) -> BackendFuture<()>;

    fn information(
        &self,
        subject: InformationSubject,
        detail: Option<&str>,
    ) -> BackendFuture<InformationResult>;

    /// Read `length` bytes (the rest if `None`) of a LOB from `offset`.
    fn get_lob(&self, id: &str, offset: u64, length: Option<u64>) -> BackendFuture<LobChunk>;

    /// Close the database session.
    fn close(&self) -> BackendFuture<()>;
}

/// Factory for backend connections, selected when the proxy starts.
pub trait Backend: Send + Sync {
    /// Create an unconnected backend connection.
    fn create_connection(&self) -> Result<Box<dyn BackendConnection>>;

    fn type_repository(&self) -> Arc<dyn TypeRepository>;
}
