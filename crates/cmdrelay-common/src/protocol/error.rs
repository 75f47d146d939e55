use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine-readable error codes carried on the wire.
///
/// These appear inside `error.code` of both `Error` envelopes and failed
/// `Response` envelopes. `NoTargetAvailable` keeps its historical wire name
/// `NO_BROWSER` so existing orchestrators keep matching on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed envelope
    #[serde(alias = "INVALID_MESSAGE")]
    ValidationError,
    /// Envelope exceeds the configured payload ceiling
    MessageTooLarge,
    /// Register carried a role outside the closed set
    #[serde(alias = "INVALID_CLIENT_TYPE")]
    InvalidRole,
    RateLimitExceeded,
    InvalidSender,
    NotRegistered,
    #[serde(rename = "NO_BROWSER")]
    NoTargetAvailable,
    Timeout,
    ConnectionLost,
    ExecutionError,
    TargetNotFound,
    InvalidParams,
    Unauthorized,
}

impl ErrorCode {
    /// The wire spelling of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::MessageTooLarge => "MESSAGE_TOO_LARGE",
            ErrorCode::InvalidRole => "INVALID_ROLE",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::InvalidSender => "INVALID_SENDER",
            ErrorCode::NotRegistered => "NOT_REGISTERED",
            ErrorCode::NoTargetAvailable => "NO_BROWSER",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ConnectionLost => "CONNECTION_LOST",
            ErrorCode::ExecutionError => "EXECUTION_ERROR",
            ErrorCode::TargetNotFound => "TARGET_NOT_FOUND",
            ErrorCode::InvalidParams => "INVALID_PARAMS",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload as it appears on the wire: `{"code": ..., "message": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Invalid message: {0}")]
    Validation(String),

    #[error("Message too large: {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("Invalid role: {0}")]
    InvalidRole(String),

    #[error("Rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimitExceeded { retry_after_ms: u64 },

    #[error("Message type '{message_type}' not allowed for role {role}")]
    InvalidSender { message_type: String, role: String },

    #[error("Client is not registered")]
    NotRegistered,

    #[error("No executor connected")]
    NoTargetAvailable,

    #[error("Command timed out after {0}ms")]
    Timeout(u64),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Command '{0}' is already pending")]
    DuplicateCommand(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl RelayError {
    /// Maps this error onto the code reported to peers.
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::Validation(_) | RelayError::JsonSerialization(_) => {
                ErrorCode::ValidationError
            }
            RelayError::MessageTooLarge { .. } => ErrorCode::MessageTooLarge,
            RelayError::InvalidRole(_) => ErrorCode::InvalidRole,
            RelayError::RateLimitExceeded { .. } => ErrorCode::RateLimitExceeded,
            RelayError::InvalidSender { .. } => ErrorCode::InvalidSender,
            RelayError::NotRegistered => ErrorCode::NotRegistered,
            RelayError::NoTargetAvailable => ErrorCode::NoTargetAvailable,
            RelayError::Timeout(_) => ErrorCode::Timeout,
            RelayError::ConnectionLost(_) | RelayError::Io(_) | RelayError::Transport(_) => {
                ErrorCode::ConnectionLost
            }
            RelayError::DuplicateCommand(_) => ErrorCode::ValidationError,
            RelayError::Execution(_) => ErrorCode::ExecutionError,
            RelayError::TargetNotFound(_) => ErrorCode::TargetNotFound,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody::new(self.code(), self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_target_keeps_legacy_wire_name() {
        let json = serde_json::to_string(&ErrorCode::NoTargetAvailable).unwrap();
        assert_eq!(json, "\"NO_BROWSER\"");
        assert_eq!(ErrorCode::NoTargetAvailable.as_str(), "NO_BROWSER");
    }

    #[test]
    fn test_as_str_matches_serde() {
        for code in [
            ErrorCode::ValidationError,
            ErrorCode::MessageTooLarge,
            ErrorCode::RateLimitExceeded,
            ErrorCode::InvalidSender,
            ErrorCode::Timeout,
            ErrorCode::TargetNotFound,
        ] {
            let json = serde_json::to_value(code).unwrap();
            assert_eq!(json.as_str(), Some(code.as_str()));
        }
    }

    #[test]
    fn test_legacy_aliases_deserialize() {
        let code: ErrorCode = serde_json::from_str("\"INVALID_MESSAGE\"").unwrap();
        assert_eq!(code, ErrorCode::ValidationError);
        let code: ErrorCode = serde_json::from_str("\"INVALID_CLIENT_TYPE\"").unwrap();
        assert_eq!(code, ErrorCode::InvalidRole);
    }

    #[test]
    fn test_error_body_from_relay_error() {
        let body = RelayError::Timeout(30000).to_body();
        assert_eq!(body.code, ErrorCode::Timeout);
        assert!(body.message.contains("30000"));
    }
}
