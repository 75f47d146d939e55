//! Envelope Types
//!
//! Every frame exchanged with the broker is a JSON object whose `type` field
//! selects one of the [`Envelope`] variants below.

use super::error::{ErrorBody, ErrorCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Correlation identifier chosen by the command originator.
pub type CommandId = String;

/// Free-form peer metadata sent at registration.
pub type Metadata = serde_json::Map<String, Value>;

/// Wire `type` values the broker understands.
pub const MESSAGE_TYPES: &[&str] = &[
    "connection",
    "register",
    "registered",
    "command",
    "response",
    "event",
    "ping",
    "pong",
    "status",
    "error",
    "server_shutdown",
];

/// Broker-assigned client identity.
///
/// Ids are generated by the broker on connect and never accepted from peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two roles a peer can register as.
///
/// `vscode` and `browser` are accepted as aliases for older peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "vscode")]
    Orchestrator,
    #[serde(alias = "browser")]
    Executor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Orchestrator => "orchestrator",
            Role::Executor => "executor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "orchestrator" | "vscode" => Ok(Role::Orchestrator),
            "executor" | "browser" => Ok(Role::Executor),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Number of connected clients per role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCounts {
    pub orchestrator: usize,
    pub executor: usize,
    pub total: usize,
}

/// A command sent by an orchestrator for an executor to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    #[serde(rename = "command", alias = "name")]
    pub name: String,
    #[serde(default)]
    pub params: Value,
    #[serde(rename = "targetId", default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<ClientId>,
}

impl Command {
    pub fn new(id: impl Into<CommandId>, name: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            params,
            target_id: None,
        }
    }

    /// Routes the command to a single executor instead of broadcasting it.
    pub fn with_target(mut self, target: ClientId) -> Self {
        self.target_id = Some(target);
        self
    }
}

/// An executor's answer to a [`Command`], or a failure synthesized by the broker.
///
/// # Example
///
/// ```
/// use cmdrelay_common::protocol::{Response, ErrorCode};
/// use serde_json::json;
///
/// let ok = Response::success("c1", json!({"value": 42}));
/// assert!(ok.success);
///
/// let failed = Response::failure("c2", ErrorCode::Timeout, "no answer");
/// assert_eq!(failed.error.unwrap().code, ErrorCode::Timeout);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: CommandId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// Set when the executor succeeded only after a fallback strategy.
    #[serde(default, skip_serializing_if = "is_false")]
    pub healed: bool,
    #[serde(rename = "healAttempt", default, skip_serializing_if = "Option::is_none")]
    pub heal_attempt: Option<u32>,
    /// Target descriptor that finally resolved, when healed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Response {
    pub fn success(id: impl Into<CommandId>, data: Value) -> Self {
        Self {
            id: id.into(),
            success: true,
            data: Some(data),
            error: None,
            healed: false,
            heal_attempt: None,
            descriptor: None,
        }
    }

    pub fn failure(id: impl Into<CommandId>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            data: None,
            error: Some(ErrorBody::new(code, message)),
            healed: false,
            heal_attempt: None,
            descriptor: None,
        }
    }

    /// Tags the response as self-healed on the given attempt.
    pub fn healed(mut self, attempt: u32, descriptor: impl Into<String>) -> Self {
        self.healed = true;
        self.heal_attempt = Some(attempt);
        self.descriptor = Some(descriptor.into());
        self
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Sent by the broker as soon as a socket is accepted.
    #[serde(rename_all = "camelCase")]
    Connection {
        client_id: ClientId,
        server_version: String,
    },
    Register {
        #[serde(alias = "clientType")]
        role: Role,
        #[serde(default)]
        metadata: Metadata,
    },
    #[serde(rename_all = "camelCase")]
    Registered {
        client_id: ClientId,
        role: Role,
        connected_clients: RoleCounts,
    },
    Command(Command),
    Response(Response),
    /// Unsolicited notification from an executor, fanned out to orchestrators.
    Event {
        #[serde(rename = "event")]
        kind: String,
        #[serde(default)]
        data: Value,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Pong {
        #[serde(default)]
        timestamp: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        original_timestamp: Option<u64>,
    },
    Status {
        clients: RoleCounts,
    },
    Error {
        error: ErrorBody,
    },
    ServerShutdown {
        #[serde(default)]
        message: String,
    },
}

impl Envelope {
    /// The wire `type` of this envelope.
    pub fn type_name(&self) -> &'static str {
        match self {
            Envelope::Connection { .. } => "connection",
            Envelope::Register { .. } => "register",
            Envelope::Registered { .. } => "registered",
            Envelope::Command(_) => "command",
            Envelope::Response(_) => "response",
            Envelope::Event { .. } => "event",
            Envelope::Ping { .. } => "ping",
            Envelope::Pong { .. } => "pong",
            Envelope::Status { .. } => "status",
            Envelope::Error { .. } => "error",
            Envelope::ServerShutdown { .. } => "server_shutdown",
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Envelope::Error {
            error: ErrorBody::new(code, message),
        }
    }

    pub fn ping() -> Self {
        Envelope::Ping {
            timestamp: Some(now_millis()),
        }
    }

    pub fn pong(original_timestamp: Option<u64>) -> Self {
        Envelope::Pong {
            timestamp: now_millis(),
            original_timestamp,
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
