//! Server-side buffered cursor.
//!
//! Rows pulled from the native cursor are buffered so that fetches can be
//! replayed and, for scrollable cursors, scrolled backwards. A fetch is
//! split into [`BufferedCursor::plan_fetch`], which decides whether the
//! backend must be asked for more rows, and [`BufferedCursor::absorb`],
//! which takes the backend rows (if any) and produces the reply.

use crate::backend::{Row, RowBatch};
use crate::error::{CursorProblem, Error, Result};
use crate::protocol::message::CursorDescription;
use crate::protocol::types::ColumnMetadata;

/// Decided shape of one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPlan {
    /// Absolute start position
    pub position: u64,
    /// Row limit, `None` for everything buffered
    pub count: Option<usize>,
    pub forward: bool,
    /// Rows to pull from the backend first: `Some(None)` pulls everything
    pub backend_rows: Option<Option<usize>>,
}

#[derive(Debug)]
pub struct BufferedCursor {
    id: String,
    statement_id: Option<String>,
    scrollable: bool,
    columns: Vec<ColumnMetadata>,
    /// Buffered rows; `rows[0]` sits at absolute position `base`
    rows: Vec<Row>,
    base: u64,
    position: u64,
    backend_has_more: bool,
    compaction_threshold: usize,
}

impl BufferedCursor {
    pub fn new(
        id: impl Into<String>,
        statement_id: Option<String>,
        scrollable: bool,
        columns: Vec<ColumnMetadata>,
        compaction_threshold: usize,
    ) -> Self {
        Self {
            id: id.into(),
            statement_id,
            scrollable,
            columns,
            rows: Vec::new(),
            base: 0,
            position: 0,
            backend_has_more: true,
            compaction_threshold,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Statement the cursor was opened from, `None` for simple queries.
    pub fn statement_id(&self) -> Option<&str> {
        self.statement_id.as_deref()
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Number of rows held in memory.
    pub fn buffered(&self) -> usize {
        self.rows.len()
    }

    pub fn description(&self) -> CursorDescription {
        CursorDescription {
            cursor_id: self.id.clone(),
            scrollable: self.scrollable,
            columns: self.columns.clone(),
        }
    }

    fn end(&self) -> u64 {
        self.base + self.rows.len() as u64
    }

    pub fn plan_fetch(
        &self,
        position: Option<u64>,
        count: Option<usize>,
        forward: bool,
    ) -> Result<FetchPlan> {
        // A forward-only cursor only continues from where it is.
        if !self.scrollable && (!forward || position.is_some()) {
            return Err(Error::cursor(CursorProblem::NotScrollable, &self.id));
        }
        let position = position.unwrap_or(self.position);
        let end = self.end();
        let backend_rows = if forward && self.backend_has_more {
            match count {
                None => Some(None),
                Some(count) => {
                    let bound = position.saturating_add(count as u64);
                    (bound > end).then(|| Some(usize::try_from(bound - end).unwrap_or(usize::MAX)))
                }
            }
        } else {
            None
        };
        Ok(FetchPlan {
            position,
            count,
            forward,
            backend_rows,
        })
    }

    /// Take the backend rows of `plan` and return the rows to send and the
    /// more-data flag.
    pub fn absorb(&mut self, plan: FetchPlan, batch: Option<RowBatch>) -> (Vec<Row>, bool) {
        if let Some(batch) = batch {
            self.rows.extend(batch.rows);
            self.backend_has_more = batch.more;
        }
        let end = self.end();
        let start = plan.position.clamp(self.base, end);

        let (rows, more) = if plan.forward {
            let bound = match plan.count {
                Some(count) => start.saturating_add(count as u64).min(end),
                None => end,
            };
            let rows = self.rows[self.index(start)..self.index(bound)].to_vec();
            self.position = bound;
            (rows, bound < end || self.backend_has_more)
        } else {
            let lower = match plan.count {
                Some(count) => start.saturating_sub(count as u64).max(self.base),
                None => self.base,
            };
            let rows = self.rows[self.index(lower)..self.index(start)]
                .iter()
                .rev()
                .cloned()
                .collect();
            self.position = lower;
            (rows, lower > 0)
        };

        self.compact();
        (rows, more)
    }

    fn index(&self, position: u64) -> usize {
        usize::try_from(position - self.base).unwrap_or(usize::MAX)
    }

    fn compact(&mut self) {
        if self.scrollable {
            return;
        }
        let behind = self.index(self.position);
        if behind > self.compaction_threshold {
            self.rows.drain(..behind);
            self.base = self.position;
        }
    }
}
