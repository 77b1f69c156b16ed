//! Backend executor task.
//!
//! Owns the pooled backend connection and the session's resource registry.
//! Requests are run one at a time in arrival order; every outcome is sent
//! back to the session loop. When the request channel closes, everything
//! still open is released and the connection is closed.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backend::{ExecuteResult, RowBatch};
use crate::error::{CursorProblem, Error, ErrorType, Result};
use crate::opts::ProxyOpts;
use crate::pool::PooledConnection;
use crate::state::action::{BackendRequest, Completion};

use super::connection::SessionEvent;
use super::cursor::BufferedCursor;
use super::registry::{Closing, ResourceRegistry, close_failure};

pub struct Executor {
    conn: PooledConnection,
    registry: ResourceRegistry,
    compaction_threshold: usize,
    max_lob_chunk: u64,
}

impl Executor {
    pub fn new(conn: PooledConnection, opts: &ProxyOpts) -> Self {
        Self {
            conn,
            registry: ResourceRegistry::new(),
            compaction_threshold: opts.compaction_threshold,
            max_lob_chunk: opts.max_lob_chunk as u64,
        }
    }

    pub async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<BackendRequest>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) {
        while let Some(request) = requests.recv().await {
            let result = self.handle(request).await;
            if events.send(SessionEvent::Completed(result)).is_err() {
                break;
            }
        }
        self.shutdown().await;
    }

    async fn shutdown(mut self) {
        let closings = self.registry.release_all();
        let (statements, cursors) = self.close_all(closings).await;
        if !statements.is_empty() || !cursors.is_empty() {
            warn!(error = %close_failure(&statements, &cursors), "executor: release on close");
        }
        let id = self.conn.id();
        if let Err(e) = self.conn.close().await {
            warn!(id, error = %e, "executor: closing backend connection failed");
        }
        debug!(id, "executor: backend connection released");
    }

    /// Close natively; returns the statement and cursor ids that failed.
    async fn close_all(&mut self, closings: Vec<Closing>) -> (Vec<String>, Vec<String>) {
        let mut statements = Vec::new();
        let mut cursors = Vec::new();
        for closing in closings {
            match closing {
                Closing::Cursor(id) => {
                    if let Err(e) = self.conn.close_cursor(&id).await {
                        debug!(id, error = %e, "executor: close cursor failed");
                        cursors.push(id);
                    }
                }
                Closing::Statement(id) => {
                    if let Err(e) = self.conn.close_statement(&id).await {
                        debug!(id, error = %e, "executor: close statement failed");
                        statements.push(id);
                    }
                }
            }
        }
        (statements, cursors)
    }

    /// Close resources a new one replaces. Failures only get logged.
    async fn replace(&mut self, closings: Vec<Closing>) {
        let (statements, cursors) = self.close_all(closings).await;
        if !statements.is_empty() || !cursors.is_empty() {
            warn!(error = %close_failure(&statements, &cursors), "executor: replacing resources");
        }
    }

    async fn handle(&mut self, request: BackendRequest) -> Result<Completion> {
        match request {
            BackendRequest::SimpleQuery {
                sql,
                cursor_id,
                scrollable,
                max_fetch,
            } => {
                let closings = self.registry.retire_cursor(&cursor_id);
                self.replace(closings).await;
                match self.conn.simple_query(&sql, &cursor_id, scrollable).await? {
                    ExecuteResult::Update(n) => Ok(Completion::Update(n)),
                    ExecuteResult::Rows(columns) => {
                        let mut cursor = BufferedCursor::new(
                            cursor_id,
                            None,
                            scrollable,
                            columns,
                            self.compaction_threshold,
                        );
                        let plan = cursor.plan_fetch(None, max_fetch, true)?;
                        let batch = match plan.backend_rows {
                            Some(max_rows) => Some(self.conn.fetch(cursor.id(), max_rows).await?),
                            None => None,
                        };
                        let (rows, more) = cursor.absorb(plan, batch);
                        let description = cursor.description();
                        self.registry.insert_cursor(cursor);
                        Ok(Completion::Query {
                            description,
                            rows,
                            more,
                        })
                    }
                }
            }
            BackendRequest::Prepare { statement_id, sql } => {
                let closings = self.registry.retire_statement(&statement_id);
                self.replace(closings).await;
                self.conn.prepare(&statement_id, &sql).await?;
                self.registry.insert_statement(statement_id);
                Ok(Completion::Prepared)
            }
            BackendRequest::Execute {
                statement_id,
                cursor_id,
                scrollable,
                parameters,
            } => {
                if !self.registry.has_statement(&statement_id) {
                    return Err(Error::recover(
                        ErrorType::StatementNotFound,
                        format!("The statement '{}' does not exist", statement_id),
                    ));
                }
                let closings = self.registry.retire_cursor(&cursor_id);
                self.replace(closings).await;
                let result = self
                    .conn
                    .execute(&statement_id, &cursor_id, scrollable, parameters)
                    .await?;
                match result {
                    ExecuteResult::Update(n) => Ok(Completion::Update(n)),
                    ExecuteResult::Rows(columns) => {
                        let cursor = BufferedCursor::new(
                            cursor_id,
                            Some(statement_id),
                            scrollable,
                            columns,
                            self.compaction_threshold,
                        );
                        let description = cursor.description();
                        self.registry.insert_cursor(cursor);
                        Ok(Completion::CursorOpened(description))
                    }
                }
            }
            BackendRequest::Fetch {
                cursor_id,
                position,
                count,
                forward,
            } => {
                let cursor = self
                    .registry
                    .cursor_mut(&cursor_id)
                    .ok_or_else(|| Error::cursor(CursorProblem::DoesNotExist, &cursor_id))?;
                let plan = cursor.plan_fetch(position, count, forward)?;
                let batch: Option<RowBatch> = match plan.backend_rows {
                    Some(max_rows) => Some(self.conn.fetch(&cursor_id, max_rows).await?),
                    None => None,
                };
                let (rows, more) = cursor.absorb(plan, batch);
                Ok(Completion::Fetched { rows, more })
            }
            BackendRequest::Release {
                cursors,
                statements,
            } => {
                let closings = self.registry.release(&cursors, &statements);
                let (failed_statements, failed_cursors) = self.close_all(closings).await;
                if failed_statements.is_empty() && failed_cursors.is_empty() {
                    Ok(Completion::Released)
                } else {
                    Err(close_failure(&failed_statements, &failed_cursors))
                }
            }
            BackendRequest::SetFeatures(settings) => {
                self.conn.set_features(settings).await?;
                Ok(Completion::FeaturesSet)
            }
            BackendRequest::Commit => {
                self.conn.commit().await?;
                Ok(Completion::TransactionFinished)
            }
            BackendRequest::Rollback => {
                self.conn.rollback().await?;
                Ok(Completion::TransactionFinished)
            }
            BackendRequest::Information { subject, detail } => {
                let result = self.conn.information(subject, detail.as_deref()).await?;
                Ok(Completion::Information(result))
            }
            BackendRequest::GetLob { id, offset, length } => {
                let length = length.map_or(self.max_lob_chunk, |len| len.min(self.max_lob_chunk));
                let chunk = self.conn.get_lob(&id, offset, Some(length)).await?;
                Ok(Completion::Lob(chunk))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::backend::{MemoryBackend, Scripted};
    use crate::pool::ConnectionPool;
    use crate::protocol::types::{ColumnMetadata, DataFormat, TypeCode};

    fn rows(n: i64) -> Scripted {
        Scripted::Rows {
            columns: vec![ColumnMetadata::new("n", TypeCode::Integer, "int4")],
            rows: (0..n).map(|i| vec![json!(i)]).collect(),
        }
    }

    async fn executor(backend: &MemoryBackend, opts: &ProxyOpts) -> Executor {
        let pool = Arc::new(ConnectionPool::new(Arc::new(backend.clone()), 1));
        let conn = pool.acquire("db").unwrap().wait().await.unwrap();
        Executor::new(conn, opts)
    }

    #[tokio::test]
    async fn release_reports_every_failure() {
        let backend = MemoryBackend::new()
            .with_query("q", rows(1))
            .with_failing_close("c1")
            .with_failing_close("s2");
        let mut ex = executor(&backend, &ProxyOpts::default()).await;
        for id in ["s1", "s2"] {
            ex.handle(BackendRequest::Prepare {
                statement_id: id.into(),
                sql: "q".into(),
            })
            .await
            .unwrap();
        }
        for (cursor, statement) in [("c1", "s1"), ("c2", "s1")] {
            ex.handle(BackendRequest::Execute {
                statement_id: statement.into(),
                cursor_id: cursor.into(),
                scrollable: false,
                parameters: Vec::new(),
            })
            .await
            .unwrap();
        }
        let err = ex
            .handle(BackendRequest::Release {
                cursors: vec!["c1".into(), "c2".into()],
                statements: vec!["s1".into(), "s2".into()],
            })
            .await
            .unwrap_err();
        assert_eq!(
            err.message(),
            "Failed to close statements: 's2' and/or cursors: 'c1'."
        );
        // everything closable was closed
        assert_eq!(backend.closed_ids(), vec!["c2", "s1"]);
    }

    #[tokio::test]
    async fn unknown_resources() {
        let backend = MemoryBackend::new();
        let mut ex = executor(&backend, &ProxyOpts::default()).await;
        let err = ex
            .handle(BackendRequest::Execute {
                statement_id: "nope".into(),
                cursor_id: "c".into(),
                scrollable: false,
                parameters: Vec::new(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), ErrorType::StatementNotFound);

        let err = ex
            .handle(BackendRequest::Fetch {
                cursor_id: "c".into(),
                position: None,
                count: None,
                forward: true,
            })
            .await
            .unwrap_err();
        assert_eq!(err.message(), "The cursor 'c' does not exist");
    }

    #[tokio::test]
    async fn simple_query_streams_the_first_rows() {
        let backend = MemoryBackend::new().with_query("q", rows(5));
        let mut ex = executor(&backend, &ProxyOpts::default()).await;
        let completion = ex
            .handle(BackendRequest::SimpleQuery {
                sql: "q".into(),
                cursor_id: "c".into(),
                scrollable: false,
                max_fetch: Some(2),
            })
            .await
            .unwrap();
        let Completion::Query { rows, more, .. } = completion else {
            panic!("expected a query result");
        };
        assert_eq!(rows.len(), 2);
        assert!(more);
        assert_eq!(backend.fetches(), vec![("c".to_string(), Some(2))]);

        let completion = ex
            .handle(BackendRequest::Fetch {
                cursor_id: "c".into(),
                position: None,
                count: None,
                forward: true,
            })
            .await
            .unwrap();
        assert_eq!(
            completion,
            Completion::Fetched {
                rows: (2..5).map(|i| vec![json!(i)]).collect(),
                more: false
            }
        );
    }

    #[tokio::test]
    async fn lob_reads_are_clamped() {
        let backend =
            MemoryBackend::new().with_lob("BLOB_1", DataFormat::Binary, vec![7; 10]);
        let opts = ProxyOpts {
            max_lob_chunk: 4,
            ..ProxyOpts::default()
        };
        let mut ex = executor(&backend, &opts).await;
        let Completion::Lob(chunk) = ex
            .handle(BackendRequest::GetLob {
                id: "BLOB_1".into(),
                offset: 8,
                length: None,
            })
            .await
            .unwrap()
        else {
            panic!("expected a LOB chunk");
        };
        assert_eq!(chunk.data.len(), 2);
        assert_eq!(chunk.total_size, 10);
    }

    #[tokio::test]
    async fn reused_cursor_id_closes_the_old_cursor() {
        let backend = MemoryBackend::new().with_query("q", rows(3));
        let mut ex = executor(&backend, &ProxyOpts::default()).await;
        for _ in 0..2 {
            ex.handle(BackendRequest::SimpleQuery {
                sql: "q".into(),
                cursor_id: "c".into(),
                scrollable: false,
                max_fetch: Some(0),
            })
            .await
            .unwrap();
        }
        assert_eq!(backend.closed_ids(), vec!["c"]);
        ex.shutdown().await;
        assert_eq!(backend.closed_ids(), vec!["c", "c"]);
        assert_eq!(backend.open_connections(), 0);
    }
}
