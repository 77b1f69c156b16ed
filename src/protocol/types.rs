//! Common SQP wire types.

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Encoding of a message or raw payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataFormat {
    /// Text frames (UTF-8)
    #[default]
    Text,
    /// Binary frames
    Binary,
}

/// Big-endian 32-bit unsigned integer for zerocopy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct U32BE([u8; 4]);

impl U32BE {
    /// Create a new U32BE from a native u32.
    pub const fn new(value: u32) -> Self {
        Self(value.to_be_bytes())
    }

    /// Get the native u32 value.
    pub const fn get(self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

impl From<u32> for U32BE {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<U32BE> for u32 {
    fn from(value: U32BE) -> Self {
        value.get()
    }
}

/// Transport frame header: flags byte followed by the payload length.
///
/// Flags: bit 7 is FIN, the low nibble is the opcode
/// (0 = continuation, 1 = text, 2 = binary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FrameHeader {
    pub flags: u8,
    pub len: U32BE,
}

/// SQP logical type of a column or parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeCode {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Decimal,
    Char,
    VarChar,
    Binary,
    VarBinary,
    Time,
    Date,
    Timestamp,
    Interval,
    Custom,
    Xml,
    Blob,
    Clob,
    Unknown,
}

impl TypeCode {
    /// All standard type codes, in declaration order.
    pub const ALL: [TypeCode; 21] = [
        TypeCode::Boolean,
        TypeCode::TinyInt,
        TypeCode::SmallInt,
        TypeCode::Integer,
        TypeCode::BigInt,
        TypeCode::Real,
        TypeCode::Double,
        TypeCode::Decimal,
        TypeCode::Char,
        TypeCode::VarChar,
        TypeCode::Binary,
        TypeCode::VarBinary,
        TypeCode::Time,
        TypeCode::Date,
        TypeCode::Timestamp,
        TypeCode::Interval,
        TypeCode::Custom,
        TypeCode::Xml,
        TypeCode::Blob,
        TypeCode::Clob,
        TypeCode::Unknown,
    ];

    /// Look up a type code by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.name() == name)
    }

    /// Wire name of the type code.
    pub fn name(self) -> &'static str {
        match self {
            TypeCode::Boolean => "Boolean",
            TypeCode::TinyInt => "TinyInt",
            TypeCode::SmallInt => "SmallInt",
            TypeCode::Integer => "Integer",
            TypeCode::BigInt => "BigInt",
            TypeCode::Real => "Real",
            TypeCode::Double => "Double",
            TypeCode::Decimal => "Decimal",
            TypeCode::Char => "Char",
            TypeCode::VarChar => "VarChar",
            TypeCode::Binary => "Binary",
            TypeCode::VarBinary => "VarBinary",
            TypeCode::Time => "Time",
            TypeCode::Date => "Date",
            TypeCode::Timestamp => "Timestamp",
            TypeCode::Interval => "Interval",
            TypeCode::Custom => "Custom",
            TypeCode::Xml => "Xml",
            TypeCode::Blob => "Blob",
            TypeCode::Clob => "Clob",
            TypeCode::Unknown => "Unknown",
        }
    }

    /// Default (and maximum) precision.
    pub fn default_precision(self) -> u32 {
        match self {
            TypeCode::Boolean | TypeCode::TinyInt | TypeCode::Binary => 1,
            TypeCode::SmallInt => 2,
            TypeCode::Integer => 4,
            TypeCode::BigInt => 8,
            TypeCode::Real => 6,
            TypeCode::Double => 15,
            TypeCode::Time | TypeCode::Timestamp | TypeCode::Interval => 9,
            _ => 0,
        }
    }

    /// Default (and maximum) scale.
    pub fn default_scale(self) -> u32 {
        match self {
            TypeCode::Real => 6,
            TypeCode::Double => 15,
            _ => 0,
        }
    }

    /// True for types whose values are LOB descriptors.
    pub fn is_lob(self) -> bool {
        matches!(self, TypeCode::Blob | TypeCode::Clob)
    }

    /// JSON schema describing values of this type.
    pub fn schema(self) -> Option<JsonValue> {
        let schema = match self {
            TypeCode::Boolean => json!({"type": "boolean"}),
            TypeCode::TinyInt => json!({"type": "integer", "minimum": -128, "maximum": 127}),
            TypeCode::SmallInt => {
                json!({"type": "integer", "minimum": i16::MIN, "maximum": i16::MAX})
            }
            TypeCode::Integer => {
                json!({"type": "integer", "minimum": i32::MIN, "maximum": i32::MAX})
            }
            TypeCode::BigInt => {
                json!({"type": "integer", "minimum": i64::MIN, "maximum": i64::MAX})
            }
            TypeCode::Real | TypeCode::Double => json!({"type": "number"}),
            TypeCode::Decimal => json!({"type": "string", "format": "decimal"}),
            TypeCode::Char | TypeCode::VarChar | TypeCode::Xml => json!({"type": "string"}),
            TypeCode::Binary | TypeCode::VarBinary => {
                json!({"type": "string", "contentEncoding": "base64"})
            }
            TypeCode::Time => json!({"type": "string", "format": "time"}),
            TypeCode::Date => json!({"type": "string", "format": "date"}),
            TypeCode::Timestamp => json!({"type": "string", "format": "date-time"}),
            TypeCode::Interval => json!({"type": "string", "format": "duration"}),
            TypeCode::Blob | TypeCode::Clob => json!({
                "type": "object",
                "properties": {"id": {"type": "string"}, "size": {"type": "integer"}},
                "required": ["id"]
            }),
            TypeCode::Custom | TypeCode::Unknown => return None,
        };
        Some(schema)
    }
}

/// Description of one result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    /// Column name
    pub name: String,
    /// SQP logical type
    #[serde(rename = "type")]
    pub type_code: TypeCode,
    /// Backend type name
    #[serde(default)]
    pub native_type: String,
    #[serde(default)]
    pub precision: u32,
    #[serde(default)]
    pub scale: u32,
}

impl ColumnMetadata {
    /// Column with the type's default precision and scale.
    pub fn new(name: impl Into<String>, type_code: TypeCode, native_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_code,
            native_type: native_type.into(),
            precision: type_code.default_precision(),
            scale: type_code.default_scale(),
        }
    }
}

/// Subject of an information request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InformationSubject {
    SupportsBinaryProtocol,
    SupportedNativeTypes,
    #[serde(rename = "DBMSName")]
    DbmsName,
    MaxPrecision,
    MaxScale,
    TypeSchema,
}

/// Type of the `value` carried by an information response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InformationResponseType {
    Text,
    Boolean,
    Schema,
    Integer,
    TextArray,
    Unknown,
}

impl InformationResponseType {
    /// Whether a JSON value has the shape this response type promises.
    pub fn accepts(self, value: &JsonValue) -> bool {
        match self {
            InformationResponseType::Text => value.is_string(),
            InformationResponseType::Boolean => value.is_boolean(),
            InformationResponseType::Schema => value.is_object() || value.is_string(),
            InformationResponseType::Integer => value.is_i64() || value.is_u64(),
            InformationResponseType::TextArray => value
                .as_array()
                .is_some_and(|items| items.iter().all(JsonValue::is_string)),
            InformationResponseType::Unknown => true,
        }
    }
}
