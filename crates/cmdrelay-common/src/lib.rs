//! cmdrelay Common Types
//!
//! Shared building blocks for the cmdrelay broker, orchestrator client and
//! executor runtime.
//!
//! # Overview
//!
//! cmdrelay lets an orchestrator process drive actions in an executor process
//! it cannot call directly. Both connect to a broker over WebSocket and
//! exchange JSON envelopes. This crate defines:
//!
//! - [`protocol`] - Envelope types, roles, ids and error codes
//! - [`validator`] - Structural validation of inbound frames
//! - [`rate_limit`] - Per-client sliding-window admission control
//! - [`auth`] - Optional API-key authentication on upgrade
//! - [`transport`] - JSON text codec
//!
//! # Example
//!
//! ```
//! use cmdrelay_common::{Command, Envelope, Response};
//! use serde_json::json;
//!
//! let command = Envelope::Command(Command::new("c1", "read_title", json!({})));
//! let reply = Response::success("c1", json!({"title": "Home"}));
//! assert_eq!(command.type_name(), "command");
//! assert!(reply.success);
//! ```

pub mod auth;
pub mod protocol;
pub mod rate_limit;
pub mod transport;
pub mod validator;

pub use protocol::*;
