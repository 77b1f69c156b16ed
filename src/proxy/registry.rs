//! Open statements and cursors of one session.
//!
//! The registry decides what has to be closed; the executor performs the
//! native closes. A statement with open cursors stays alive until its last
//! cursor is closed.

use std::collections::HashMap;

use crate::error::{Error, ErrorType};

use super::cursor::BufferedCursor;

/// A native resource to close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Closing {
    Cursor(String),
    Statement(String),
}

#[derive(Debug, Default)]
struct StatementEntry {
    open_cursors: usize,
    close_pending: bool,
}

#[derive(Debug, Default)]
pub struct ResourceRegistry {
    statements: HashMap<String, StatementEntry>,
    cursors: HashMap<String, BufferedCursor>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_statement(&self, id: &str) -> bool {
        self.statements
            .get(id)
            .is_some_and(|entry| !entry.close_pending)
    }

    pub fn cursor_mut(&mut self, id: &str) -> Option<&mut BufferedCursor> {
        self.cursors.get_mut(id)
    }

    pub fn cursor_count(&self) -> usize {
        self.cursors.len()
    }

    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    pub fn insert_statement(&mut self, id: impl Into<String>) {
        self.statements.insert(id.into(), StatementEntry::default());
    }

    /// Register an opened cursor. The id must have been retired first.
    pub fn insert_cursor(&mut self, cursor: BufferedCursor) {
        if let Some(entry) = cursor
            .statement_id()
            .and_then(|id| self.statements.get_mut(id))
        {
            entry.open_cursors += 1;
        }
        self.cursors.insert(cursor.id().to_string(), cursor);
    }

    /// Drop the cursor `id` if it exists, e.g. before reusing the id.
    pub fn retire_cursor(&mut self, id: &str) -> Vec<Closing> {
        let Some(cursor) = self.cursors.remove(id) else {
            return Vec::new();
        };
        let mut closings = vec![Closing::Cursor(id.to_string())];
        let Some(statement_id) = cursor.statement_id() else {
            return closings;
        };
        if let Some(entry) = self.statements.get_mut(statement_id) {
            entry.open_cursors = entry.open_cursors.saturating_sub(1);
            if entry.open_cursors == 0 && entry.close_pending {
                self.statements.remove(statement_id);
                closings.push(Closing::Statement(statement_id.to_string()));
            }
        }
        closings
    }

    /// Drop the statement `id` and its cursors, e.g. before re-preparing it.
    pub fn retire_statement(&mut self, id: &str) -> Vec<Closing> {
        if !self.statements.contains_key(id) {
            return Vec::new();
        }
        let mut derived: Vec<String> = self
            .cursors
            .values()
            .filter(|cursor| cursor.statement_id() == Some(id))
            .map(|cursor| cursor.id().to_string())
            .collect();
        derived.sort();
        let mut closings = Vec::new();
        for cursor_id in derived {
            self.cursors.remove(&cursor_id);
            closings.push(Closing::Cursor(cursor_id));
        }
        self.statements.remove(id);
        closings.push(Closing::Statement(id.to_string()));
        closings
    }

    /// Close the named cursors, then the named statements. Unknown ids are skipped.
    pub fn release(&mut self, cursors: &[String], statements: &[String]) -> Vec<Closing> {
        let mut closings = Vec::new();
        for id in cursors {
            closings.extend(self.retire_cursor(id));
        }
        for id in statements {
            let Some(entry) = self.statements.get_mut(id) else {
                continue;
            };
            if entry.open_cursors > 0 {
                entry.close_pending = true;
            } else {
                self.statements.remove(id);
                closings.push(Closing::Statement(id.clone()));
            }
        }
        closings
    }

    /// Everything still open, cursors first.
    pub fn release_all(&mut self) -> Vec<Closing> {
        let mut cursors: Vec<String> = self.cursors.drain().map(|(id, _)| id).collect();
        cursors.sort();
        let mut statements: Vec<String> = self.statements.drain().map(|(id, _)| id).collect();
        statements.sort();
        cursors
            .into_iter()
            .map(Closing::Cursor)
            .chain(statements.into_iter().map(Closing::Statement))
            .collect()
    }
}

/// Aggregated error for a release that could not close everything.
pub fn close_failure(statements: &[String], cursors: &[String]) -> Error {
    Error::recover(
        ErrorType::CloseFailed,
        format!(
            "Failed to close statements: '{}' and/or cursors: '{}'.",
            statements.join(", "),
            cursors.join(", ")
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(id: &str, statement: Option<&str>) -> BufferedCursor {
        BufferedCursor::new(id, statement.map(str::to_string), false, Vec::new(), 50)
    }

    #[test]
    fn reused_cursor_id_closes_previous() {
        let mut registry = ResourceRegistry::new();
        registry.insert_cursor(cursor("c", None));
        assert_eq!(registry.retire_cursor("c"), vec![Closing::Cursor("c".into())]);
        assert!(registry.retire_cursor("c").is_empty());
    }

    #[test]
    fn statement_close_waits_for_cursors() {
        let mut registry = ResourceRegistry::new();
        registry.insert_statement("s");
        registry.insert_cursor(cursor("c1", Some("s")));
        registry.insert_cursor(cursor("c2", Some("s")));

        assert!(registry.release(&[], &["s".into()]).is_empty());
        assert!(!registry.has_statement("s"));
        assert_eq!(registry.statement_count(), 1);

        assert_eq!(
            registry.release(&["c1".into()], &[]),
            vec![Closing::Cursor("c1".into())]
        );
        assert_eq!(
            registry.release(&["c2".into()], &[]),
            vec![
                Closing::Cursor("c2".into()),
                Closing::Statement("s".into())
            ]
        );
        assert_eq!(registry.statement_count(), 0);
    }

    #[test]
    fn reprepare_closes_cursors_and_statement() {
        let mut registry = ResourceRegistry::new();
        registry.insert_statement("s");
        registry.insert_cursor(cursor("c", Some("s")));
        assert_eq!(
            registry.retire_statement("s"),
            vec![Closing::Cursor("c".into()), Closing::Statement("s".into())]
        );
        assert_eq!(registry.cursor_count(), 0);
    }

    #[test]
    fn release_all_empties_everything() {
        let mut registry = ResourceRegistry::new();
        registry.insert_statement("s");
        registry.insert_cursor(cursor("c", Some("s")));
        registry.insert_cursor(cursor("d", None));
        let closings = registry.release_all();
        assert_eq!(closings.len(), 3);
        assert_eq!(closings[2], Closing::Statement("s".into()));
        assert_eq!(registry.cursor_count() + registry.statement_count(), 0);
    }

    #[test]
    fn close_failure_message() {
        let err = close_failure(&["s1".into()], &["c1".into(), "c2".into()]);
        assert_eq!(
            err.message(),
            "Failed to close statements: 's1' and/or cursors: 'c1, c2'."
        );
        assert_eq!(err.error_type(), ErrorType::CloseFailed);
    }
}
