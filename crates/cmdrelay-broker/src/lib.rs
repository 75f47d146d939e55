//! WebSocket command broker.
//!
//! Orchestrators send commands, executors run them and reply. The broker
//! routes each command to the executors, correlates the first reply back to
//! its origin and fails the command if no reply arrives in time.

pub mod broker;
pub mod client;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod history;
pub mod liveness;
pub mod registry;
pub mod routes;
pub mod server;
pub mod sweeper;

pub use broker::{Broker, SharedBroker};
pub use client::{ClientSummary, Liveness, Outbound};
pub use config::{BrokerConfig, ConfigError};
pub use history::{HistoryEntry, HistoryPage, HistoryQuery, HistoryStatus};
pub use server::{shutdown_signal, BrokerServer};
