//! Client-side column and parameter values.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, ErrorType, Result};
use crate::protocol::types::TypeCode;

/// Descriptor of a LOB; the bytes are read through [`super::LobStream`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobDescriptor {
    pub id: String,
    /// Total size in bytes; negative if unknown
    #[serde(default = "unknown_size")]
    pub size: i64,
}

fn unknown_size() -> i64 {
    -1
}

/// A decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    /// Exact decimal in its textual form
    Decimal(String),
    Text(String),
    Binary(Vec<u8>),
    Lob(LobDescriptor),
    /// Custom or unknown types, left as JSON
    Json(JsonValue),
}

fn mismatch(type_code: TypeCode, json: &JsonValue) -> Error {
    Error::recover(
        ErrorType::DecodingError,
        format!("Cannot decode {} as {}", json, type_code.name()),
    )
}

impl Value {
    /// Decode a row value according to its column type.
    pub fn decode(type_code: TypeCode, json: &JsonValue) -> Result<Value> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        let value = match type_code {
            TypeCode::Boolean => json.as_bool().map(Value::Boolean),
            TypeCode::TinyInt | TypeCode::SmallInt | TypeCode::Integer | TypeCode::BigInt => {
                json.as_i64().map(Value::Integer)
            }
            TypeCode::Real | TypeCode::Double => json.as_f64().map(Value::Double),
            TypeCode::Decimal => match json {
                JsonValue::String(s) => Some(Value::Decimal(s.clone())),
                JsonValue::Number(n) => Some(Value::Decimal(n.to_string())),
                _ => None,
            },
            TypeCode::Char
            | TypeCode::VarChar
            | TypeCode::Xml
            | TypeCode::Time
            | TypeCode::Date
            | TypeCode::Timestamp
            | TypeCode::Interval => json.as_str().map(|s| Value::Text(s.to_string())),
            TypeCode::Binary | TypeCode::VarBinary => {
                let Some(encoded) = json.as_str() else {
                    return Err(mismatch(type_code, json));
                };
                let bytes = BASE64.decode(encoded).map_err(|e| {
                    Error::recover(ErrorType::DecodingError, format!("Invalid base64: {}", e))
                })?;
                Some(Value::Binary(bytes))
            }
            TypeCode::Blob | TypeCode::Clob => serde_json::from_value(json.clone())
                .ok()
                .map(Value::Lob),
            TypeCode::Custom | TypeCode::Unknown => Some(Value::Json(json.clone())),
        };
        value.ok_or_else(|| mismatch(type_code, json))
    }

    /// Wire form of the value as a parameter.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Boolean(b) => JsonValue::Bool(*b),
            Value::Integer(i) => JsonValue::from(*i),
            Value::Double(d) => JsonValue::from(*d),
            Value::Decimal(s) | Value::Text(s) => JsonValue::String(s.clone()),
            Value::Binary(bytes) => JsonValue::String(BASE64.encode(bytes)),
            Value::Lob(descriptor) => serde_json::json!({
                "id": descriptor.id,
                "size": descriptor.size,
            }),
            Value::Json(json) => json.clone(),
        }
    }

    /// Type code a parameter of this value is sent with; `None` for null.
    pub fn type_code(&self) -> Option<TypeCode> {
        let code = match self {
            Value::Null => return None,
            Value::Boolean(_) => TypeCode::Boolean,
            Value::Integer(_) => TypeCode::BigInt,
            Value::Double(_) => TypeCode::Double,
            Value::Decimal(_) => TypeCode::Decimal,
            Value::Text(_) => TypeCode::VarChar,
            Value::Binary(_) => TypeCode::VarBinary,
            Value::Lob(descriptor) if descriptor.id.starts_with("CLOB") => TypeCode::Clob,
            Value::Lob(_) => TypeCode::Blob,
            Value::Json(_) => TypeCode::Unknown,
        };
        Some(code)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Binary(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Binary(value.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Conversion from a decoded [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

fn conversion(value: &Value, target: &str) -> Error {
    Error::recover(
        ErrorType::UnexpectedResultType,
        format!("Cannot convert {:?} to {}", value, target),
    )
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Boolean(b) => Ok(*b),
            other => Err(conversion(other, "bool")),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Integer(i) => Ok(*i),
            other => Err(conversion(other, "i64")),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Integer(i) => i32::try_from(*i).map_err(|_| conversion(value, "i32")),
            other => Err(conversion(other, "i32")),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Double(d) => Ok(*d),
            #[expect(clippy::cast_precision_loss)]
            Value::Integer(i) => Ok(*i as f64),
            other => Err(conversion(other, "f64")),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) | Value::Decimal(s) => Ok(s.clone()),
            other => Err(conversion(other, "String")),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Binary(bytes) => Ok(bytes.clone()),
            other => Err(conversion(other, "Vec<u8>")),
        }
    }
}

impl FromValue for LobDescriptor {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Lob(descriptor) => Ok(descriptor.clone()),
            other => Err(conversion(other, "LobDescriptor")),
        }
    }
}

impl FromValue for JsonValue {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.to_json())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_by_column_type() {
        assert_eq!(
            Value::decode(TypeCode::Integer, &json!(42)).unwrap(),
            Value::Integer(42)
        );
        assert_eq!(
            Value::decode(TypeCode::Decimal, &json!("1.50")).unwrap(),
            Value::Decimal("1.50".into())
        );
        assert_eq!(
            Value::decode(TypeCode::VarBinary, &json!("AQID")).unwrap(),
            Value::Binary(vec![1, 2, 3])
        );
        assert_eq!(
            Value::decode(TypeCode::Blob, &json!({"id": "BLOB_1", "size": 3})).unwrap(),
            Value::Lob(LobDescriptor {
                id: "BLOB_1".into(),
                size: 3
            })
        );
        assert!(Value::decode(TypeCode::Boolean, &json!(1)).is_err());
        assert_eq!(Value::decode(TypeCode::Date, &JsonValue::Null).unwrap(), Value::Null);
    }

    #[test]
    fn binary_travels_as_base64() {
        assert_eq!(Value::Binary(vec![1, 2, 3]).to_json(), json!("AQID"));
    }

    #[test]
    fn conversions() {
        assert_eq!(i32::from_value(&Value::Integer(7)).unwrap(), 7);
        assert!(i32::from_value(&Value::Integer(i64::MAX)).is_err());
        assert_eq!(Option::<String>::from_value(&Value::Null).unwrap(), None);
        let err = bool::from_value(&Value::Text("x".into())).unwrap_err();
        assert_eq!(err.error_type(), ErrorType::UnexpectedResultType);
    }
}
