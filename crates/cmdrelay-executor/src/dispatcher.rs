//! Resilient Dispatch
//!
//! Runs one command against an [`ActionHandler`]. When the command carries a
//! target descriptor and the first attempt fails with `TargetNotFound`, the
//! dispatcher walks the [`FallbackStrategy`] list once, in order, and retries
//! with each derived descriptor until one succeeds or the attempts run out.
//!
//! # State machine
//!
//! ```text
//! Attempt(descriptor, next) --ok--> Success
//!          |
//!          +--TargetNotFound--> Retryable(error, next) --strategy--> Attempt(..)
//!          |                              |
//!          +--other error-->  Exhausted <-+--no strategy left
//! ```

use cmdrelay_common::protocol::{Command, Response};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::DispatchError;
use crate::handler::ActionHandler;
use crate::strategy::FallbackStrategy;

/// Initial attempt plus one per fallback strategy.
pub const MAX_ATTEMPTS: u32 = 1 + FallbackStrategy::ORDER.len() as u32;

/// Resilient dispatch configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Params key holding the target descriptor
    ///
    /// Default: `"selector"`
    pub descriptor_key: String,
    /// Wait before delayed re-resolution
    ///
    /// Default: 1s
    pub re_resolve_delay: Duration,
    /// Upper bound on attempts per command, capped at [`MAX_ATTEMPTS`]
    ///
    /// Default: 4
    pub max_attempts: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            descriptor_key: "selector".to_string(),
            re_resolve_delay: Duration::from_secs(1),
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

/// A successful dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub data: Value,
    /// 1-based number of the attempt that succeeded
    pub attempt: u32,
    /// Descriptor used by the successful attempt, if the command had one
    pub descriptor: Option<String>,
}

impl Dispatched {
    pub fn healed(&self) -> bool {
        self.attempt > 1
    }
}

enum State {
    Attempt {
        descriptor: String,
        next_strategy: usize,
    },
    Retryable {
        error: DispatchError,
        next_strategy: usize,
    },
    Exhausted(DispatchError),
}

pub struct ResilientDispatcher<H> {
    handler: Arc<H>,
    config: DispatchConfig,
}

impl<H: ActionHandler> ResilientDispatcher<H> {
    pub fn new(handler: Arc<H>, config: DispatchConfig) -> Self {
        Self { handler, config }
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Runs `command` and builds the response to send back.
    ///
    /// Success after a fallback is tagged with `healed`, the attempt number
    /// and the descriptor that worked.
    pub async fn dispatch(&self, command: &Command) -> Response {
        match self.run(&command.name, &command.params).await {
            Ok(outcome) => {
                let healed = outcome.healed();
                let mut response = Response::success(command.id.clone(), outcome.data);
                if let (true, Some(descriptor)) = (healed, outcome.descriptor) {
                    info!(
                        command_id = %command.id,
                        attempt = outcome.attempt,
                        descriptor = %descriptor,
                        "Recovered target through fallback"
                    );
                    response = response.healed(outcome.attempt, descriptor);
                }
                response
            }
            Err(error) => {
                debug!(command_id = %command.id, error = %error, "Command failed");
                Response::failure(command.id.clone(), error.code(), error.to_string())
            }
        }
    }

    /// Drives the attempt state machine for one command.
    ///
    /// # Returns
    /// - `Ok(Dispatched)` - Some attempt succeeded
    /// - `Err(DispatchError)` - A terminal error, or the last error once
    ///   every strategy was tried
    pub async fn run(&self, name: &str, params: &Value) -> Result<Dispatched, DispatchError> {
        let Some(original) = self.descriptor(params) else {
            let data = self.handler.execute(name, params).await?;
            return Ok(Dispatched {
                data,
                attempt: 1,
                descriptor: None,
            });
        };

        let max_attempts = self.config.max_attempts.clamp(1, MAX_ATTEMPTS);
        let mut attempt = 0u32;
        let mut state = State::Attempt {
            descriptor: original.clone(),
            next_strategy: 0,
        };

        loop {
            state = match state {
                State::Attempt {
                    descriptor,
                    next_strategy,
                } => {
                    attempt += 1;
                    let params = with_descriptor(params, &self.config.descriptor_key, &descriptor);
                    match self.handler.execute(name, &params).await {
                        Ok(data) => {
                            return Ok(Dispatched {
                                data,
                                attempt,
                                descriptor: Some(descriptor),
                            })
                        }
                        Err(error) if error.is_retryable() && attempt < max_attempts => {
                            State::Retryable {
                                error,
                                next_strategy,
                            }
                        }
                        Err(error) => State::Exhausted(error),
                    }
                }
                State::Retryable {
                    error,
                    next_strategy,
                } => match self.next_fallback(&original, next_strategy) {
                    Some((index, strategy, descriptor)) => {
                        warn!(
                            command = name,
                            attempt,
                            strategy = strategy.name(),
                            descriptor = %descriptor,
                            "Target not found, retrying"
                        );
                        let delay = strategy.delay(self.config.re_resolve_delay);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        State::Attempt {
                            descriptor,
                            next_strategy: index + 1,
                        }
                    }
                    None => State::Exhausted(error),
                },
                State::Exhausted(error) => return Err(error),
            };
        }
    }

    /// First applicable strategy at or after `from`.
    fn next_fallback(
        &self,
        original: &str,
        from: usize,
    ) -> Option<(usize, FallbackStrategy, String)> {
        FallbackStrategy::ORDER
            .iter()
            .enumerate()
            .skip(from)
            .find_map(|(index, strategy)| {
                strategy
                    .derive(original)
                    .map(|descriptor| (index, *strategy, descriptor))
            })
    }

    fn descriptor(&self, params: &Value) -> Option<String> {
        params
            .get(&self.config.descriptor_key)
            .and_then(Value::as_str)
            .filter(|d| !d.trim().is_empty())
            .map(str::to_string)
    }
}

fn with_descriptor(params: &Value, key: &str, descriptor: &str) -> Value {
    let mut params = params.clone();
    if let Some(map) = params.as_object_mut() {
        map.insert(key.to_string(), Value::String(descriptor.to_string()));
    }
    params
}
