use cmdrelay_common::protocol::{ErrorCode, RelayError};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Failure of a single action attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// The target descriptor matched nothing. The only retryable failure.
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Execution error: {0}")]
    Execution(String),
}

impl DispatchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DispatchError::TargetNotFound(_) => ErrorCode::TargetNotFound,
            DispatchError::InvalidParams(_) | DispatchError::UnknownCommand(_) => {
                ErrorCode::InvalidParams
            }
            DispatchError::Execution(_) => ErrorCode::ExecutionError,
        }
    }

    /// Whether a fallback strategy may be tried after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::TargetNotFound(_))
    }
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Connection failed: {0}")]
    Connect(#[from] tungstenite::Error),

    #[error("Invalid executor configuration: {0}")]
    Config(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Gave up after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error(transparent)]
    Protocol(#[from] RelayError),
}
