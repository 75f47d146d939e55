//! cmdrelay Executor
//!
//! The executor side of the relay: a runtime that keeps a registered
//! connection to the broker, and a [`ResilientDispatcher`] that runs each
//! command against an [`ActionHandler`], retrying target resolution through
//! fallback strategies when the target cannot be found.

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod runtime;
pub mod strategy;

pub use dispatcher::{DispatchConfig, Dispatched, ResilientDispatcher, MAX_ATTEMPTS};
pub use error::{DispatchError, ExecutorError};
pub use handler::{ActionHandler, EventSender};
pub use runtime::{ExecutorConfig, ExecutorRuntime};
pub use strategy::FallbackStrategy;
