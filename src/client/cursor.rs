//! Client-side cursors.

use std::collections::HashMap;

use crate::backend::Row;
use crate::error::{CursorProblem, Error, ErrorType, Result};
use crate::protocol::message::CursorDescription;
use crate::protocol::types::ColumnMetadata;

use super::connection::Connection;
use super::lob::LobStream;
use super::value::{FromValue, LobDescriptor, Value};

/// Result of executing a query or statement.
#[derive(Debug)]
pub enum QueryResult {
    Update(u64),
    Cursor(Cursor),
}

impl QueryResult {
    pub fn affected_rows(&self) -> Option<u64> {
        match self {
            QueryResult::Update(n) => Some(*n),
            QueryResult::Cursor(_) => None,
        }
    }

    pub fn into_cursor(self) -> Result<Cursor> {
        match self {
            QueryResult::Cursor(cursor) => Ok(cursor),
            QueryResult::Update(_) => Err(Error::recover(
                ErrorType::UnexpectedResultType,
                "The statement did not produce a result set",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    BeforeFirst,
    /// Index into the locally held rows
    At(usize),
    AfterLast,
}

/// Cursor over a result set held by the proxy.
///
/// Rows are fetched on demand while moving forward. A forward-only cursor
/// keeps only the current row; a scrollable one keeps every row read so
/// far and can move back.
///
/// Moving takes `&mut self`, so at most one fetch per cursor is in flight:
///
/// ```compile_fail
/// # async fn example(cursor: &mut sqp::Cursor) {
/// let first = cursor.next_row();
/// let second = cursor.next_row();
/// let _ = tokio::join!(first, second);
/// # }
/// ```
pub struct Cursor {
    conn: Connection,
    id: String,
    scrollable: bool,
    columns: Vec<ColumnMetadata>,
    rows: Vec<Row>,
    position: Position,
    more: bool,
    /// Decoded values of the current row
    cache: HashMap<usize, Value>,
    closed: bool,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("id", &self.id)
            .field("scrollable", &self.scrollable)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Cursor {
    pub(crate) fn new(conn: Connection, description: CursorDescription, rows: Vec<Row>, more: bool) -> Self {
        Self {
            conn,
            id: description.cursor_id,
            scrollable: description.scrollable,
            columns: description.columns,
            rows,
            position: Position::BeforeFirst,
            more,
            cache: HashMap::new(),
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_scrollable(&self) -> bool {
        self.scrollable
    }

    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    /// Whether the proxy may still have rows beyond the local ones.
    pub fn has_more(&self) -> bool {
        self.more
    }

    /// Index of a column, compared case-insensitively.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::InvalidUsage(format!("No column named '{}'", name)))
    }

    /// Move to the next row, fetching from the proxy when needed.
    pub async fn next_row(&mut self) -> Result<bool> {
        self.check_open()?;
        let next = match self.position {
            Position::BeforeFirst => 0,
            Position::At(i) => i + 1,
            Position::AfterLast => return Ok(false),
        };
        if next >= self.rows.len() && self.more {
            let count = self.conn.opts().cursor_max_fetch;
            let fetched = self.conn.fetch(&self.id, None, count, true).await?;
            self.rows.extend(fetched.rows);
            self.more = fetched.more;
        }
        self.cache.clear();
        if next >= self.rows.len() {
            self.position = Position::AfterLast;
            return Ok(false);
        }
        if self.scrollable || next == 0 {
            self.position = Position::At(next);
        } else {
            self.rows.drain(..next);
            self.position = Position::At(0);
        }
        Ok(true)
    }

    /// Move to the previous row. Only scrollable cursors can move back.
    pub fn previous_row(&mut self) -> Result<bool> {
        self.check_open()?;
        if !self.scrollable {
            return Err(Error::cursor(CursorProblem::NotScrollable, &self.id));
        }
        self.cache.clear();
        let (position, moved) = match self.position {
            Position::BeforeFirst | Position::At(0) => (Position::BeforeFirst, false),
            Position::At(i) => (Position::At(i - 1), true),
            Position::AfterLast if self.rows.is_empty() => (Position::BeforeFirst, false),
            Position::AfterLast => (Position::At(self.rows.len() - 1), true),
        };
        self.position = position;
        Ok(moved)
    }

    /// Decoded value of a column of the current row.
    pub fn value(&mut self, column: usize) -> Result<&Value> {
        self.check_open()?;
        let Position::At(index) = self.position else {
            return Err(Error::InvalidUsage("The cursor is not on a row".into()));
        };
        let Some(meta) = self.columns.get(column) else {
            return Err(Error::InvalidUsage(format!(
                "Column {} is out of range ({} columns)",
                column,
                self.columns.len()
            )));
        };
        let Some(raw) = self.rows.get(index).and_then(|row| row.get(column)) else {
            return Err(Error::recover(
                ErrorType::DecodingError,
                format!("Row {} has no value for column {}", index, column),
            ));
        };
        if !self.cache.contains_key(&column) {
            let value = Value::decode(meta.type_code, raw)?;
            self.cache.insert(column, value);
        }
        self.cache
            .get(&column)
            .ok_or_else(|| Error::InvalidUsage("Value cache is inconsistent".into()))
    }

    pub fn get<T: FromValue>(&mut self, column: usize) -> Result<T> {
        T::from_value(self.value(column)?)
    }

    pub fn get_by_name<T: FromValue>(&mut self, name: &str) -> Result<T> {
        let column = self.column_index(name)?;
        self.get(column)
    }

    /// Decoded values of the current row.
    pub fn row(&mut self) -> Result<Vec<Value>> {
        (0..self.columns.len())
            .map(|column| self.value(column).cloned())
            .collect()
    }

    /// Stream the LOB in a column of the current row.
    pub fn lob(&mut self, column: usize) -> Result<LobStream> {
        let descriptor = self.get::<LobDescriptor>(column)?;
        Ok(self.conn.open_lob(&descriptor))
    }

    /// Read every remaining row.
    pub async fn collect_rows(&mut self) -> Result<Vec<Vec<Value>>> {
        let mut rows = Vec::new();
        while self.next_row().await? {
            rows.push(self.row()?);
        }
        Ok(rows)
    }

    /// Release the cursor on the proxy.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.rows.clear();
        self.cache.clear();
        self.conn.release(vec![self.id.clone()], Vec::new()).await
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::cursor(CursorProblem::Closed, &self.id));
        }
        Ok(())
    }
}
