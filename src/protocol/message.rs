//! SQP messages.
//!
//! Every message is identified by a one-byte type id. Messages with content
//! carry a JSON body after the id; the others are just the id.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::ServerError;

use super::types::{ColumnMetadata, InformationResponseType, InformationSubject, TypeCode};

/// Message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Error,
    Close,
    Ready,
    Hello,
    AuthenticationResponse,
    SimpleQuery,
    PrepareQuery,
    PrepareComplete,
    ExecuteQuery,
    ExecuteComplete,
    FetchData,
    CursorDescription,
    RowData,
    EndOfData,
    Release,
    ReleaseComplete,
    SetFeature,
    SetFeatureComplete,
    Commit,
    Rollback,
    TransactionFinished,
    InformationRequest,
    InformationResponse,
    TypeMapping,
    TypeMappingRegistered,
    LobAnnouncement,
    LobReceived,
    LobRequest,
}

impl MessageType {
    /// Type id byte on the wire.
    pub fn id(self) -> u8 {
        match self {
            MessageType::Error => b'!',
            MessageType::Close => b'.',
            MessageType::Ready => b'r',
            MessageType::Hello => b'H',
            MessageType::AuthenticationResponse => b'A',
            MessageType::SimpleQuery => b'S',
            MessageType::PrepareQuery => b'P',
            MessageType::PrepareComplete => b'p',
            MessageType::ExecuteQuery => b'X',
            MessageType::ExecuteComplete => b'x',
            MessageType::FetchData => b'F',
            MessageType::CursorDescription => b'c',
            MessageType::RowData => b'#',
            MessageType::EndOfData => b'e',
            MessageType::Release => b'L',
            MessageType::ReleaseComplete => b'l',
            MessageType::SetFeature => b'T',
            MessageType::SetFeatureComplete => b't',
            MessageType::Commit => b'K',
            MessageType::Rollback => b'B',
            MessageType::TransactionFinished => b'k',
            MessageType::InformationRequest => b'I',
            MessageType::InformationResponse => b'i',
            MessageType::TypeMapping => b'M',
            MessageType::TypeMappingRegistered => b'm',
            MessageType::LobAnnouncement => b'*',
            MessageType::LobReceived => b'o',
            MessageType::LobRequest => b'G',
        }
    }

    /// Look up a message type by its id byte.
    pub fn from_id(id: u8) -> Option<Self> {
        let ty = match id {
            b'!' => MessageType::Error,
            b'.' => MessageType::Close,
            b'r' => MessageType::Ready,
            b'H' => MessageType::Hello,
            b'A' => MessageType::AuthenticationResponse,
            b'S' => MessageType::SimpleQuery,
            b'P' => MessageType::PrepareQuery,
            b'p' => MessageType::PrepareComplete,
            b'X' => MessageType::ExecuteQuery,
            b'x' => MessageType::ExecuteComplete,
            b'F' => MessageType::FetchData,
            b'c' => MessageType::CursorDescription,
            b'#' => MessageType::RowData,
            b'e' => MessageType::EndOfData,
            b'L' => MessageType::Release,
            b'l' => MessageType::ReleaseComplete,
            b'T' => MessageType::SetFeature,
            b't' => MessageType::SetFeatureComplete,
            b'K' => MessageType::Commit,
            b'B' => MessageType::Rollback,
            b'k' => MessageType::TransactionFinished,
            b'I' => MessageType::InformationRequest,
            b'i' => MessageType::InformationResponse,
            b'M' => MessageType::TypeMapping,
            b'm' => MessageType::TypeMappingRegistered,
            b'*' => MessageType::LobAnnouncement,
            b'o' => MessageType::LobReceived,
            b'G' => MessageType::LobRequest,
            _ => return None,
        };
        Some(ty)
    }

    /// Whether the message carries a body after the type id.
    pub fn has_content(self) -> bool {
        !matches!(
            self,
            MessageType::Close
                | MessageType::Ready
                | MessageType::PrepareComplete
                | MessageType::ReleaseComplete
                | MessageType::SetFeatureComplete
                | MessageType::Commit
                | MessageType::Rollback
                | MessageType::TransactionFinished
                | MessageType::LobReceived
        )
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

fn default_id() -> String {
    "Default".into()
}

fn minus_one() -> i64 {
    -1
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    pub database: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationResponse {
    #[serde(default)]
    pub response: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleQuery {
    pub query: String,
    #[serde(default = "default_id")]
    pub cursor_id: String,
    #[serde(default)]
    pub scrollable: bool,
    /// Rows to stream immediately; negative means all.
    #[serde(default = "minus_one")]
    pub max_fetch: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareQuery {
    pub query: String,
    #[serde(default = "default_id")]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteQuery {
    #[serde(default = "default_id")]
    pub statement_id: String,
    #[serde(default = "default_id")]
    pub cursor_id: String,
    #[serde(default)]
    pub scrollable: bool,
    #[serde(default)]
    pub parameter_types: Vec<TypeCode>,
    /// Custom type name per parameter position, `None` for standard types.
    #[serde(default)]
    pub custom_types: Vec<Option<String>>,
    /// One inner list per batch.
    #[serde(default)]
    pub parameters: Vec<Vec<JsonValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteComplete {
    pub affected_rows: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchData {
    #[serde(default = "default_id")]
    pub cursor_id: String,
    /// Absolute row position; negative means the current position.
    #[serde(default = "minus_one")]
    pub position: i64,
    /// Row limit; negative means everything buffered.
    #[serde(default = "minus_one")]
    pub max_fetch: i64,
    #[serde(default = "yes")]
    pub forward: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorDescription {
    pub cursor_id: String,
    #[serde(default)]
    pub scrollable: bool,
    pub columns: Vec<ColumnMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowData {
    pub data: Vec<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndOfData {
    pub more: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Release {
    #[serde(default)]
    pub cursors: Vec<String>,
    #[serde(default)]
    pub statements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetFeature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_commit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_native_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InformationRequest {
    pub subject: InformationSubject,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InformationResponse {
    pub response_type: InformationResponseType,
    #[serde(default)]
    pub value: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeMapping {
    pub name: String,
    #[serde(default)]
    pub schema: Option<JsonValue>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeMappingRegistered {
    pub native: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobAnnouncement {
    pub id: String,
    /// Total size in bytes; negative if unknown.
    #[serde(default = "minus_one")]
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobRequest {
    pub id: String,
    #[serde(default = "minus_one")]
    pub offset: i64,
    #[serde(default = "minus_one")]
    pub size: i64,
}

/// A decoded SQP message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Error(ServerError),
    Close,
    Ready,
    Hello(Hello),
    AuthenticationResponse(AuthenticationResponse),
    SimpleQuery(SimpleQuery),
    PrepareQuery(PrepareQuery),
    PrepareComplete,
    ExecuteQuery(ExecuteQuery),
    ExecuteComplete(ExecuteComplete),
    FetchData(FetchData),
    CursorDescription(CursorDescription),
    RowData(RowData),
    EndOfData(EndOfData),
    Release(Release),
    ReleaseComplete,
    SetFeature(SetFeature),
    SetFeatureComplete,
    Commit,
    Rollback,
    TransactionFinished,
    InformationRequest(InformationRequest),
    InformationResponse(InformationResponse),
    TypeMapping(TypeMapping),
    TypeMappingRegistered(TypeMappingRegistered),
    LobAnnouncement(LobAnnouncement),
    LobReceived,
    LobRequest(LobRequest),
}

impl Message {
    /// Type discriminator of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Error(_) => MessageType::Error,
            Message::Close => MessageType::Close,
            Message::Ready => MessageType::Ready,
            Message::Hello(_) => MessageType::Hello,
            Message::AuthenticationResponse(_) => MessageType::AuthenticationResponse,
            Message::SimpleQuery(_) => MessageType::SimpleQuery,
            Message::PrepareQuery(_) => MessageType::PrepareQuery,
            Message::PrepareComplete => MessageType::PrepareComplete,
            Message::ExecuteQuery(_) => MessageType::ExecuteQuery,
            Message::ExecuteComplete(_) => MessageType::ExecuteComplete,
            Message::FetchData(_) => MessageType::FetchData,
            Message::CursorDescription(_) => MessageType::CursorDescription,
            Message::RowData(_) => MessageType::RowData,
            Message::EndOfData(_) => MessageType::EndOfData,
            Message::Release(_) => MessageType::Release,
            Message::ReleaseComplete => MessageType::ReleaseComplete,
            Message::SetFeature(_) => MessageType::SetFeature,
            Message::SetFeatureComplete => MessageType::SetFeatureComplete,
            Message::Commit => MessageType::Commit,
            Message::Rollback => MessageType::Rollback,
            Message::TransactionFinished => MessageType::TransactionFinished,
            Message::InformationRequest(_) => MessageType::InformationRequest,
            Message::InformationResponse(_) => MessageType::InformationResponse,
            Message::TypeMapping(_) => MessageType::TypeMapping,
            Message::TypeMappingRegistered(_) => MessageType::TypeMappingRegistered,
            Message::LobAnnouncement(_) => MessageType::LobAnnouncement,
            Message::LobReceived => MessageType::LobReceived,
            Message::LobRequest(_) => MessageType::LobRequest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_invertible() {
        let all = [
            MessageType::Error,
            MessageType::Close,
            MessageType::Ready,
            MessageType::Hello,
            MessageType::AuthenticationResponse,
            MessageType::SimpleQuery,
            MessageType::PrepareQuery,
            MessageType::PrepareComplete,
            MessageType::ExecuteQuery,
            MessageType::ExecuteComplete,
            MessageType::FetchData,
            MessageType::CursorDescription,
            MessageType::RowData,
            MessageType::EndOfData,
            MessageType::Release,
            MessageType::ReleaseComplete,
            MessageType::SetFeature,
            MessageType::SetFeatureComplete,
            MessageType::Commit,
            MessageType::Rollback,
            MessageType::TransactionFinished,
            MessageType::InformationRequest,
            MessageType::InformationResponse,
            MessageType::TypeMapping,
            MessageType::TypeMappingRegistered,
            MessageType::LobAnnouncement,
            MessageType::LobReceived,
            MessageType::LobRequest,
        ];
        let mut seen = std::collections::HashSet::new();
        for ty in all {
            assert!(seen.insert(ty.id()), "duplicate id for {ty}");
            assert_eq!(MessageType::from_id(ty.id()), Some(ty));
        }
        assert_eq!(MessageType::from_id(b'?'), None);
    }

    #[test]
    fn fetch_defaults() {
        let fetch: FetchData = serde_json::from_str("{}").unwrap();
        assert_eq!(fetch.cursor_id, "Default");
        assert_eq!(fetch.position, -1);
        assert_eq!(fetch.max_fetch, -1);
        assert!(fetch.forward);
    }

    #[test]
    fn execute_field_names() {
        let exec: ExecuteQuery = serde_json::from_str(
            r#"{"statementId":"s1","cursorId":"c1","parameterTypes":["Integer"],"parameters":[[1]]}"#,
        )
        .unwrap();
        assert_eq!(exec.statement_id, "s1");
        assert_eq!(exec.parameter_types, vec![TypeCode::Integer]);
        assert!(exec.custom_types.is_empty());
        assert!(!exec.scrollable);
    }
}
