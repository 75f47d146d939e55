use serde_json::Value;
use std::future::Future;
use tokio::sync::mpsc;

use crate::error::DispatchError;

/// The thing that actually performs commands on the executor's side.
///
/// The dispatcher calls `execute` once per attempt. On retries, `params`
/// carries the rewritten target descriptor in place of the original, so a
/// handler never needs to know it is being retried.
///
/// # Example
///
/// ```rust
/// use cmdrelay_executor::{ActionHandler, DispatchError};
/// use serde_json::{json, Value};
///
/// struct Echo;
///
/// impl ActionHandler for Echo {
///     async fn execute(&self, command: &str, params: &Value) -> Result<Value, DispatchError> {
///         match command {
///             "echo" => Ok(params.clone()),
///             other => Err(DispatchError::UnknownCommand(other.to_string())),
///         }
///     }
/// }
/// ```
pub trait ActionHandler: Send + Sync + 'static {
    fn execute(
        &self,
        command: &str,
        params: &Value,
    ) -> impl Future<Output = Result<Value, DispatchError>> + Send;
}

/// Queues unsolicited `event` envelopes for delivery to orchestrators.
///
/// Events raised while the runtime is disconnected are sent after the next
/// successful registration.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<(String, Value)>,
}

impl EventSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<(String, Value)>) -> Self {
        Self { tx }
    }

    /// Returns `false` once the runtime has stopped.
    pub fn emit(&self, kind: impl Into<String>, data: Value) -> bool {
        self.tx.send((kind.into(), data)).is_ok()
    }
}
