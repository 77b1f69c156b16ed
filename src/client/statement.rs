//! Prepared statements.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::error::{Error, ErrorType, Result};
use crate::protocol::message::ExecuteQuery;
use crate::protocol::types::TypeCode;

use super::connection::Connection;
use super::cursor::QueryResult;
use super::value::Value;

/// Declared type of a parameter position.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParamType {
    type_code: TypeCode,
    custom: Option<String>,
}

impl ParamType {
    fn describe(&self) -> String {
        match &self.custom {
            Some(name) => format!("{} '{}'", self.type_code.name(), name),
            None => self.type_code.name().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum Bound {
    Value(Value),
    Custom(JsonValue),
    /// Uploaded right before the execution
    Lob(Vec<u8>),
}

/// A statement prepared on the proxy.
///
/// Parameters are bound by zero-based position. The first non-null value
/// bound at a position fixes its type; later batches have to match it.
/// Unbound positions are sent as null.
pub struct PreparedStatement {
    conn: Connection,
    id: String,
    sql: String,
    types: Vec<Option<ParamType>>,
    current: BTreeMap<usize, Bound>,
    batches: Vec<BTreeMap<usize, Bound>>,
    closed: bool,
}

impl PreparedStatement {
    pub(crate) fn new(conn: Connection, id: String, sql: String) -> Self {
        Self {
            conn,
            id,
            sql,
            types: Vec::new(),
            current: BTreeMap::new(),
            batches: Vec::new(),
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn bind(&mut self, position: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let declared = value.type_code().map(|type_code| ParamType {
            type_code,
            custom: None,
        });
        self.put(position, declared, Bound::Value(value))
    }

    /// Bind a value of a custom type registered through a type mapping.
    pub fn bind_custom(&mut self, position: usize, type_name: &str, value: JsonValue) -> Result<()> {
        let declared = (!value.is_null()).then(|| ParamType {
            type_code: TypeCode::Custom,
            custom: Some(type_name.to_string()),
        });
        self.put(position, declared, Bound::Custom(value))
    }

    /// Bind LOB contents; they are uploaded when the statement executes.
    pub fn bind_lob(&mut self, position: usize, type_code: TypeCode, data: Vec<u8>) -> Result<()> {
        if !type_code.is_lob() {
            return Err(Error::InvalidUsage(format!(
                "{} is not a LOB type",
                type_code.name()
            )));
        }
        let declared = Some(ParamType {
            type_code,
            custom: None,
        });
        self.put(position, declared, Bound::Lob(data))
    }

    /// Finish the current parameter set and start a new one.
    pub fn add_batch(&mut self) -> Result<()> {
        self.check_open()?;
        self.batches.push(std::mem::take(&mut self.current));
        Ok(())
    }

    /// Execute with every batch added so far plus the current bindings.
    pub async fn execute(&mut self) -> Result<QueryResult> {
        self.check_open()?;
        if !self.current.is_empty() || self.batches.is_empty() {
            self.batches.push(std::mem::take(&mut self.current));
        }
        let batches = std::mem::take(&mut self.batches);

        let width = self.types.len();
        let mut parameters = Vec::with_capacity(batches.len());
        for batch in batches {
            let mut values = vec![JsonValue::Null; width];
            for (position, bound) in batch {
                values[position] = match bound {
                    Bound::Value(value) => value.to_json(),
                    Bound::Custom(json) => json,
                    Bound::Lob(data) => {
                        let type_code = self.types[position]
                            .as_ref()
                            .map_or(TypeCode::Blob, |t| t.type_code);
                        let descriptor = self.conn.upload_lob(type_code, &data).await?;
                        Value::Lob(descriptor).to_json()
                    }
                };
            }
            parameters.push(values);
        }

        let query = ExecuteQuery {
            statement_id: self.id.clone(),
            cursor_id: String::new(),
            scrollable: false,
            parameter_types: self
                .types
                .iter()
                .map(|t| t.as_ref().map_or(TypeCode::Unknown, |t| t.type_code))
                .collect(),
            custom_types: self
                .types
                .iter()
                .map(|t| t.as_ref().and_then(|t| t.custom.clone()))
                .collect(),
            parameters,
        };
        self.conn.execute_statement(query).await
    }

    /// Release the statement on the proxy. Cursors opened by it stay
    /// readable until they are released too.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.conn.release(Vec::new(), vec![self.id.clone()]).await
    }

    fn put(&mut self, position: usize, declared: Option<ParamType>, bound: Bound) -> Result<()> {
        self.check_open()?;
        if self.current.contains_key(&position) {
            return Err(Error::InvalidUsage(format!(
                "Parameter {} is already bound in this batch",
                position
            )));
        }
        if self.types.len() <= position {
            self.types.resize(position + 1, None);
        }
        if let Some(declared) = declared {
            match &self.types[position] {
                Some(existing) if *existing != declared => {
                    return Err(Error::recover(
                        ErrorType::InvalidArgument,
                        format!(
                            "Parameter {} was bound as {} before, got {}",
                            position,
                            existing.describe(),
                            declared.describe()
                        ),
                    ));
                }
                Some(_) => {}
                None => self.types[position] = Some(declared),
            }
        }
        self.current.insert(position, bound);
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::recover(
                ErrorType::InvalidOperation,
                format!("The statement with id '{}' is closed.", self.id),
            ));
        }
        Ok(())
    }
}
