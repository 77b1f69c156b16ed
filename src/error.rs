//! Error types for sqp.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for sqp operations.
pub type Result<T> = core::result::Result<T, Error>;

/// What happens to a connection after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorAction {
    /// The peer is notified and the session returns to its ready state.
    Recover,
    /// The connection is torn down.
    Abort,
}

impl std::fmt::Display for ErrorAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorAction::Recover => f.write_str("Recover"),
            ErrorAction::Abort => f.write_str("Abort"),
        }
    }
}

/// Error category transmitted in `Error` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorType {
    CloseFailed,
    CursorProblem,
    ExecutionFailed,
    FetchFailed,
    #[serde(rename = "IOError")]
    IoError,
    InformationRequestFailed,
    InvalidArgument,
    InvalidOperation,
    InvalidState,
    InvalidFrame,
    DecodingError,
    UnexpectedMessage,
    OverloadedServer,
    ServerError,
    SetFeatureFailed,
    FeatureNotSupported,
    StatementNotFound,
    PrepareFailed,
    TransactionFinishFailed,
    LobReadFailed,
    TypeMappingNotPossible,
    UnexpectedResultType,
    DatabaseConnection,
    BackendDisconnected,
    NotImplemented,
    #[serde(other)]
    Unknown,
}

impl ErrorType {
    /// Wire name of the error type.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::CloseFailed => "CloseFailed",
            ErrorType::CursorProblem => "CursorProblem",
            ErrorType::ExecutionFailed => "ExecutionFailed",
            ErrorType::FetchFailed => "FetchFailed",
            ErrorType::IoError => "IOError",
            ErrorType::InformationRequestFailed => "InformationRequestFailed",
            ErrorType::InvalidArgument => "InvalidArgument",
            ErrorType::InvalidOperation => "InvalidOperation",
            ErrorType::InvalidState => "InvalidState",
            ErrorType::InvalidFrame => "InvalidFrame",
            ErrorType::DecodingError => "DecodingError",
            ErrorType::UnexpectedMessage => "UnexpectedMessage",
            ErrorType::OverloadedServer => "OverloadedServer",
            ErrorType::ServerError => "ServerError",
            ErrorType::SetFeatureFailed => "SetFeatureFailed",
            ErrorType::FeatureNotSupported => "FeatureNotSupported",
            ErrorType::StatementNotFound => "StatementNotFound",
            ErrorType::PrepareFailed => "PrepareFailed",
            ErrorType::TransactionFinishFailed => "TransactionFinishFailed",
            ErrorType::LobReadFailed => "LobReadFailed",
            ErrorType::TypeMappingNotPossible => "TypeMappingNotPossible",
            ErrorType::UnexpectedResultType => "UnexpectedResultType",
            ErrorType::DatabaseConnection => "DatabaseConnection",
            ErrorType::BackendDisconnected => "BackendDisconnected",
            ErrorType::NotImplemented => "NotImplemented",
            ErrorType::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error as carried by the `Error` wire message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerError {
    /// Error category
    pub error_type: ErrorType,
    /// Human-readable description
    pub message: String,
    /// Whether the connection survives
    #[serde(default = "default_action")]
    pub action: ErrorAction,
}

fn default_action() -> ErrorAction {
    ErrorAction::Recover
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {})", self.message, self.error_type, self.action)
    }
}

/// Reason attached to a [`ErrorType::CursorProblem`] error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorProblem {
    NotScrollable,
    Closed,
    DoesNotExist,
}

impl CursorProblem {
    fn reason(self) -> &'static str {
        match self {
            CursorProblem::NotScrollable => "is not scrollable",
            CursorProblem::Closed => "is closed",
            CursorProblem::DoesNotExist => "does not exist",
        }
    }
}

/// Error type for sqp.
#[derive(Debug, Error)]
pub enum Error {
    /// Error reported by the peer
    #[error("Server error: {0}")]
    Server(ServerError),

    /// Protocol-level error raised locally
    #[error("{kind}: {message}")]
    Sqp {
        kind: ErrorType,
        action: ErrorAction,
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed message body
    #[error("Decoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// The connection was closed while the operation was pending
    #[error("Connection closed.")]
    ConnectionClosed,

    /// Invalid usage of the client API
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Create a protocol-level error.
    pub fn new(kind: ErrorType, action: ErrorAction, message: impl Into<String>) -> Self {
        Error::Sqp {
            kind,
            action,
            message: message.into(),
        }
    }

    /// Create an error the session recovers from.
    pub fn recover(kind: ErrorType, message: impl Into<String>) -> Self {
        Self::new(kind, ErrorAction::Recover, message)
    }

    /// Create an error that tears the connection down.
    pub fn abort(kind: ErrorType, message: impl Into<String>) -> Self {
        Self::new(kind, ErrorAction::Abort, message)
    }

    /// Create a cursor error, e.g. `The cursor 'c1' is not scrollable`.
    pub fn cursor(problem: CursorProblem, cursor_id: &str) -> Self {
        Self::recover(
            ErrorType::CursorProblem,
            format!("The cursor '{}' {}", cursor_id, problem.reason()),
        )
    }

    /// Error category of this error.
    pub fn error_type(&self) -> ErrorType {
        match self {
            Error::Server(e) => e.error_type,
            Error::Sqp { kind, .. } => *kind,
            Error::Io(_) | Error::ConnectionClosed => ErrorType::IoError,
            Error::Json(_) => ErrorType::DecodingError,
            Error::InvalidUsage(_) => ErrorType::InvalidOperation,
            Error::Unsupported(_) => ErrorType::NotImplemented,
        }
    }

    /// Action associated with this error.
    pub fn action(&self) -> ErrorAction {
        match self {
            Error::Server(e) => e.action,
            Error::Sqp { action, .. } => *action,
            Error::Io(_) | Error::ConnectionClosed => ErrorAction::Abort,
            Error::Json(_) | Error::InvalidUsage(_) | Error::Unsupported(_) => {
                ErrorAction::Recover
            }
        }
    }

    /// Message without the category prefix.
    pub fn message(&self) -> String {
        match self {
            Error::Server(e) => e.message.clone(),
            Error::Sqp { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Returns true if the error indicates the connection cannot be used anymore.
    pub fn is_connection_broken(&self) -> bool {
        self.action() == ErrorAction::Abort
    }

    /// Same error with a different action.
    pub fn with_action(self, action: ErrorAction) -> Self {
        Error::new(self.error_type(), action, self.message())
    }

    /// Wire representation sent to the peer.
    pub fn to_server_error(&self) -> ServerError {
        ServerError {
            error_type: self.error_type(),
            message: self.message(),
            action: self.action(),
        }
    }

    /// Copy of this error for fanning out to several waiters.
    pub fn duplicate(&self) -> Self {
        match self {
            Error::Server(e) => Error::Server(e.clone()),
            Error::ConnectionClosed => Error::ConnectionClosed,
            other => Error::new(other.error_type(), other.action(), other.message()),
        }
    }
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized>
    From<zerocopy::error::CastError<Src, Dst>> for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::recover(ErrorType::InvalidFrame, format!("zerocopy cast error: {err:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_problem_message() {
        let err = Error::cursor(CursorProblem::NotScrollable, "c1");
        assert_eq!(err.message(), "The cursor 'c1' is not scrollable");
        assert_eq!(err.error_type(), ErrorType::CursorProblem);
        assert_eq!(err.action(), ErrorAction::Recover);
    }

    #[test]
    fn io_errors_abort() {
        let err = Error::from(std::io::Error::other("reset"));
        assert!(err.is_connection_broken());
        assert_eq!(err.to_server_error().error_type, ErrorType::IoError);
    }

    #[test]
    fn server_error_json() {
        let json = r#"{"errorType":"IOError","message":"gone","action":"Abort"}"#;
        let e: ServerError = serde_json::from_str(json).unwrap();
        assert_eq!(e.error_type, ErrorType::IoError);
        assert_eq!(e.action, ErrorAction::Abort);

        let e: ServerError =
            serde_json::from_str(r#"{"errorType":"SomethingNew","message":"x"}"#).unwrap();
        assert_eq!(e.error_type, ErrorType::Unknown);
        assert_eq!(e.action, ErrorAction::Recover);
    }
}
