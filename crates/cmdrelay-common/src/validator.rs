//! Inbound Envelope Validation
//!
//! Every frame a peer sends passes through [`MessageValidator::validate`]
//! before it can touch broker state. Validation is pure: it never consults
//! the registry, the rate limiter, or the correlator.
//!
//! Checks run in this order, first failure wins:
//!
//! 1. Raw size against the configured ceiling
//! 2. Well-formed JSON object
//! 3. Recognized `type`
//! 4. Per-type required fields (`register` role, `command` name and id, `response` id)
//! 5. Typed decode into [`Envelope`]

use crate::protocol::{Envelope, RelayError, Result, Role, MESSAGE_TYPES};
use serde_json::Value;

/// Default payload ceiling (10 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct MessageValidator {
    max_size: usize,
}

impl MessageValidator {
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Validates a raw text frame and decodes it.
    ///
    /// # Example
    ///
    /// ```
    /// use cmdrelay_common::validator::MessageValidator;
    ///
    /// let validator = MessageValidator::default();
    /// assert!(validator.validate(r#"{"type":"ping"}"#).is_ok());
    /// assert!(validator.validate(r#"{"type":"teleport"}"#).is_err());
    /// ```
    pub fn validate(&self, raw: &str) -> Result<Envelope> {
        if raw.len() > self.max_size {
            return Err(RelayError::MessageTooLarge {
                size: raw.len(),
                limit: self.max_size,
            });
        }

        let value: Value = serde_json::from_str(raw)
            .map_err(|e| RelayError::Validation(format!("malformed JSON: {}", e)))?;
        let object = value
            .as_object()
            .ok_or_else(|| RelayError::Validation("message must be a JSON object".into()))?;

        let message_type = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::Validation("missing 'type' field".into()))?;
        if !MESSAGE_TYPES.contains(&message_type) {
            return Err(RelayError::Validation(format!(
                "unrecognized message type '{}'",
                message_type
            )));
        }

        match message_type {
            "register" => {
                let role = object
                    .get("role")
                    .or_else(|| object.get("clientType"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| RelayError::InvalidRole("missing role".into()))?;
                role.parse::<Role>().map_err(RelayError::InvalidRole)?;
            }
            "command" => {
                require_non_empty(object.get("id"), "command requires a non-empty 'id'")?;
                let name = object.get("command").or_else(|| object.get("name"));
                require_non_empty(name, "command requires a non-empty 'command' name")?;
            }
            "response" => {
                require_non_empty(object.get("id"), "response requires an 'id'")?;
            }
            _ => {}
        }

        serde_json::from_value(value).map_err(|e| RelayError::Validation(e.to_string()))
    }
}

impl Default for MessageValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

fn require_non_empty(field: Option<&Value>, reason: &str) -> Result<()> {
    match field.and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(RelayError::Validation(reason.to_string())),
    }
}
