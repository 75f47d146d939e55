pub mod envelope;
pub mod error;

#[cfg(test)]
mod tests;

pub use envelope::{
    now_millis, ClientId, Command, CommandId, Envelope, Metadata, Response, Role, RoleCounts,
    MESSAGE_TYPES,
};
pub use error::{ErrorBody, ErrorCode, RelayError, Result};
