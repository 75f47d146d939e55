pub mod client;
pub mod error;

pub use client::{ClientConfig, Notification, RelayClient, DEFAULT_CALL_TIMEOUT};
pub use error::{ClientError, Result};
