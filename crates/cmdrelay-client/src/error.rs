use cmdrelay_common::protocol::{ErrorBody, RelayError};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    Connect(#[from] tungstenite::Error),

    #[error("Invalid client configuration: {0}")]
    Config(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Broker rejected the request: {0}")]
    Rejected(ErrorBody),

    #[error("Command '{command}' failed: {error}")]
    CommandFailed { command: String, error: ErrorBody },

    #[error("No response to '{command}' within {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("Connection closed")]
    Closed,

    #[error(transparent)]
    Protocol(#[from] RelayError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
