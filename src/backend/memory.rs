//! In-memory backend with scripted query results.
//!
//! Queries are opaque strings mapped to scripted outcomes. LOB parameters
//! are stored under their ids so they can be read back through `get_lob`.
//! Every call is recorded for inspection.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value as JsonValue;

use crate::error::{Error, ErrorType, Result};
use crate::protocol::message::InformationResponse;
use crate::protocol::types::{ColumnMetadata, DataFormat, InformationSubject, TypeCode};

use super::{
    Backend, BackendConnection, BackendFuture, ExecuteResult, FeatureSetting, InformationResult,
    LobChunk, Parameter, ParameterValue, Row, RowBatch, TypeRepository,
};

/// Scripted outcome of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Scripted {
    Update(u64),
    Rows {
        columns: Vec<ColumnMetadata>,
        rows: Vec<Row>,
    },
    /// Execution fails with this message
    Fail(String),
}

/// A recorded execute call.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub statement_id: String,
    pub sql: String,
    pub parameters: Vec<Vec<Parameter>>,
}

struct StoredLob {
    format: DataFormat,
    data: Vec<u8>,
}

#[derive(Default)]
struct Shared {
    scripts: HashMap<String, Scripted>,
    lobs: HashMap<String, StoredLob>,
    native_types: Vec<(String, JsonValue)>,
    information: HashMap<InformationSubject, InformationResponse>,
    failing_close: HashSet<String>,
    fail_connect: bool,
    executions: Vec<Execution>,
    fetches: Vec<(String, Option<usize>)>,
    features: Vec<FeatureSetting>,
    transactions: Vec<&'static str>,
    closed_ids: Vec<String>,
    open_connections: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn ready<T: Send + 'static>(result: Result<T>) -> BackendFuture<T> {
    Box::pin(async move { result })
}

/// In-memory backend.
///
/// Cloning shares the script, the LOB store and the call log.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcome of `sql`, for simple queries and prepared statements.
    pub fn with_query(self, sql: impl Into<String>, outcome: Scripted) -> Self {
        lock(&self.shared).scripts.insert(sql.into(), outcome);
        self
    }

    /// Store a LOB readable through `get_lob`.
    pub fn with_lob(self, id: impl Into<String>, format: DataFormat, data: Vec<u8>) -> Self {
        lock(&self.shared)
            .lobs
            .insert(id.into(), StoredLob { format, data });
        self
    }

    pub fn with_native_type(self, name: impl Into<String>, schema: JsonValue) -> Self {
        lock(&self.shared).native_types.push((name.into(), schema));
        self
    }

    pub fn with_information(self, subject: InformationSubject, response: InformationResponse) -> Self {
        lock(&self.shared).information.insert(subject, response);
        self
    }

    /// Make closing the statement or cursor `id` fail.
    pub fn with_failing_close(self, id: impl Into<String>) -> Self {
        lock(&self.shared).failing_close.insert(id.into());
        self
    }

    /// Make every connect fail.
    pub fn with_failing_connect(self) -> Self {
        lock(&self.shared).fail_connect = true;
        self
    }

    pub fn executions(&self) -> Vec<Execution> {
        lock(&self.shared).executions.clone()
    }

    /// Native fetch calls as `(cursor_id, max_rows)`.
    pub fn fetches(&self) -> Vec<(String, Option<usize>)> {
        lock(&self.shared).fetches.clone()
    }

    pub fn features(&self) -> Vec<FeatureSetting> {
        lock(&self.shared).features.clone()
    }

    /// `"commit"` and `"rollback"` calls, in order.
    pub fn transactions(&self) -> Vec<&'static str> {
        lock(&self.shared).transactions.clone()
    }

    /// Ids of statements and cursors closed so far.
    pub fn closed_ids(&self) -> Vec<String> {
        lock(&self.shared).closed_ids.clone()
    }

    /// Connections connected and not yet closed.
    pub fn open_connections(&self) -> usize {
        lock(&self.shared).open_connections
    }

    /// Bytes of a stored LOB.
    pub fn lob(&self, id: &str) -> Option<Vec<u8>> {
        lock(&self.shared).lobs.get(id).map(|lob| lob.data.clone())
    }
}

impl TypeRepository for MemoryBackend {
    fn native_types(&self) -> Vec<String> {
        lock(&self.shared)
            .native_types
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn schema(&self, native_type: &str) -> Option<JsonValue> {
        lock(&self.shared)
            .native_types
            .iter()
            .find(|(name, _)| name == native_type)
            .map(|(_, schema)| schema.clone())
    }
}

impl Backend for MemoryBackend {
    fn create_connection(&self) -> Result<Box<dyn BackendConnection>> {
        Ok(Box::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
            state: Mutex::new(ConnState::default()),
        }))
    }

    fn type_repository(&self) -> Arc<dyn TypeRepository> {
        Arc::new(self.clone())
    }
}

#[derive(Default)]
struct ConnState {
    connected: bool,
    statements: HashMap<String, String>,
    cursors: HashMap<String, VecDeque<Row>>,
}

struct MemoryConnection {
    shared: Arc<Mutex<Shared>>,
    state: Mutex<ConnState>,
}

impl MemoryConnection {
    fn run(&self, sql: &str, cursor_id: &str) -> Result<ExecuteResult> {
        let script = lock(&self.shared).scripts.get(sql).cloned();
        match script {
            Some(Scripted::Update(n)) => Ok(ExecuteResult::Update(n)),
            Some(Scripted::Rows { columns, rows }) => {
                lock(&self.state)
                    .cursors
                    .insert(cursor_id.to_string(), rows.into());
                Ok(ExecuteResult::Rows(columns))
            }
            Some(Scripted::Fail(message)) => {
                Err(Error::recover(ErrorType::ExecutionFailed, message))
            }
            None => Err(Error::recover(
                ErrorType::ExecutionFailed,
                format!("No result scripted for query '{}'", sql),
            )),
        }
    }

    fn store_lobs(&self, parameters: &[Vec<Parameter>]) {
        let mut shared = lock(&self.shared);
        for param in parameters.iter().flatten() {
            if let ParameterValue::Lob { id, data } = &param.value {
                let format = if param.type_code == TypeCode::Clob {
                    DataFormat::Text
                } else {
                    DataFormat::Binary
                };
                shared.lobs.insert(
                    id.clone(),
                    StoredLob {
                        format,
                        data: data.to_vec(),
                    },
                );
            }
        }
    }

    fn close_id(&self, id: &str) -> Result<()> {
        let mut shared = lock(&self.shared);
        if shared.failing_close.contains(id) {
            return Err(Error::recover(
                ErrorType::CloseFailed,
                format!("Failed to close '{}'", id),
            ));
        }
        shared.closed_ids.push(id.to_string());
        Ok(())
    }
}

impl BackendConnection for MemoryConnection {
    fn connect(&self, database: &str) -> BackendFuture<()> {
        let mut shared = lock(&self.shared);
        if shared.fail_connect {
            return ready(Err(Error::abort(
                ErrorType::DatabaseConnection,
                format!("Cannot connect to database '{}'", database),
            )));
        }
        shared.open_connections += 1;
        lock(&self.state).connected = true;
        ready(Ok(()))
    }

    fn simple_query(
        &self,
        sql: &str,
        cursor_id: &str,
        _scrollable: bool,
    ) -> BackendFuture<ExecuteResult> {
        ready(self.run(sql, cursor_id))
    }

    fn prepare(&self, statement_id: &str, sql: &str) -> BackendFuture<()> {
        lock(&self.state)
            .statements
            .insert(statement_id.to_string(), sql.to_string());
        ready(Ok(()))
    }

    fn execute(
        &self,
        statement_id: &str,
        cursor_id: &str,
        _scrollable: bool,
        parameters: Vec<Vec<Parameter>>,
    ) -> BackendFuture<ExecuteResult> {
        let sql = lock(&self.state).statements.get(statement_id).cloned();
        let Some(sql) = sql else {
            return ready(Err(Error::recover(
                ErrorType::StatementNotFound,
                format!("The statement '{}' does not exist", statement_id),
            )));
        };
        self.store_lobs(&parameters);
        lock(&self.shared).executions.push(Execution {
            statement_id: statement_id.to_string(),
            sql: sql.clone(),
            parameters,
        });
        ready(self.run(&sql, cursor_id))
    }

    fn fetch(&self, cursor_id: &str, max_rows: Option<usize>) -> BackendFuture<RowBatch> {
        lock(&self.shared)
            .fetches
            .push((cursor_id.to_string(), max_rows));
        let mut state = lock(&self.state);
        let Some(rows) = state.cursors.get_mut(cursor_id) else {
            return ready(Err(Error::recover(
                ErrorType::FetchFailed,
                format!("No native cursor '{}'", cursor_id),
            )));
        };
        let n = max_rows.unwrap_or(rows.len()).min(rows.len());
        let batch = RowBatch {
            rows: rows.drain(..n).collect(),
            more: !rows.is_empty(),
        };
        ready(Ok(batch))
    }

    fn close_cursor(&self, cursor_id: &str) -> BackendFuture<()> {
        let result = self.close_id(cursor_id);
        lock(&self.state).cursors.remove(cursor_id);
        ready(result)
    }

    fn close_statement(&self, statement_id: &str) -> BackendFuture<()> {
        let result = self.close_id(statement_id);
        lock(&self.state).statements.remove(statement_id);
        ready(result)
    }

    fn set_features(&self, settings: Vec<FeatureSetting>) -> BackendFuture<()> {
        lock(&self.shared).features.extend(settings);
        ready(Ok(()))
    }

    fn commit(&self) -> BackendFuture<()> {
        lock(&self.shared).transactions.push("commit");
        ready(Ok(()))
    }

    fn rollback(&self) -> BackendFuture<()> {
        lock(&self.shared).transactions.push("rollback");
        ready(Ok(()))
    }

    fn information(
        &self,
        subject: InformationSubject,
        _detail: Option<&str>,
    ) -> BackendFuture<InformationResult> {
        let answer = lock(&self.shared).information.get(&subject).cloned();
        ready(Ok(match answer {
            Some(response) => InformationResult::Answer(response),
            None => InformationResult::Unknown,
        }))
    }

    fn get_lob(&self, id: &str, offset: u64, length: Option<u64>) -> BackendFuture<LobChunk> {
        let shared = lock(&self.shared);
        let Some(lob) = shared.lobs.get(id) else {
            return ready(Err(Error::recover(
                ErrorType::LobReadFailed,
                format!("LOB with ID '{}' does not exist.", id),
            )));
        };
        let total = lob.data.len();
        let start = usize::try_from(offset).unwrap_or(total).min(total);
        let end = match length {
            Some(len) => start.saturating_add(usize::try_from(len).unwrap_or(total)).min(total),
            None => total,
        };
        let chunk = LobChunk {
            format: lob.format,
            total_size: i64::try_from(total).unwrap_or(i64::MAX),
            data: lob.data[start..end].to_vec(),
        };
        ready(Ok(chunk))
    }

    fn close(&self) -> BackendFuture<()> {
        let mut state = lock(&self.state);
        if state.connected {
            state.connected = false;
            let mut shared = lock(&self.shared);
            shared.open_connections = shared.open_connections.saturating_sub(1);
        }
        ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_pulls_in_batches() {
        let backend = MemoryBackend::new().with_query(
            "q",
            Scripted::Rows {
                columns: vec![ColumnMetadata::new("n", TypeCode::Integer, "int4")],
                rows: (0..5).map(|i| vec![JsonValue::from(i)]).collect(),
            },
        );
        let conn = backend.create_connection().unwrap();
        conn.connect("db").await.unwrap();
        assert_eq!(backend.open_connections(), 1);

        let result = conn.simple_query("q", "c", false).await.unwrap();
        assert!(matches!(result, ExecuteResult::Rows(cols) if cols.len() == 1));
        let first = conn.fetch("c", Some(3)).await.unwrap();
        assert_eq!(first.rows.len(), 3);
        assert!(first.more);
        let rest = conn.fetch("c", None).await.unwrap();
        assert_eq!(rest.rows.len(), 2);
        assert!(!rest.more);

        conn.close().await.unwrap();
        assert_eq!(backend.open_connections(), 0);
    }

    #[tokio::test]
    async fn get_lob_slices() {
        let backend = MemoryBackend::new().with_lob("b", DataFormat::Binary, b"0123456789".to_vec());
        let conn = backend.create_connection().unwrap();
        let chunk = conn.get_lob("b", 8, Some(5)).await.unwrap();
        assert_eq!(chunk.data, b"89");
        assert_eq!(chunk.total_size, 10);
        let err = conn.get_lob("nope", 0, None).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::LobReadFailed);
    }
}
