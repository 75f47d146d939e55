//! cmdrelay Metrics Collection
//!
//! Thread-safe counters and response-time tracking for the cmdrelay broker.
//!
//! # Architecture
//!
//! - [`MetricsRegistry`]: Storage, lock-free counters plus a per-command table
//! - [`MetricsCollector`]: Trait the broker reports through
//! - [`MetricsSnapshot`]: Serializable view served on `/metrics`
//!
//! # Usage Example
//!
//! ```rust
//! use cmdrelay_metrics::{BrokerMetricsCollector, MetricsCollector};
//! use std::time::Instant;
//!
//! let collector = BrokerMetricsCollector::new();
//! collector.record_message();
//! collector.tick(Instant::now());
//!
//! let snapshot = collector.snapshot();
//! println!("Total messages: {}", snapshot.total_messages);
//! ```

mod collector;
mod registry;
mod snapshot;

pub use collector::{BrokerMetricsCollector, MetricsCollector};
pub use registry::{MetricsConfig, MetricsRegistry};
pub use snapshot::{CommandMetrics, MetricsSnapshot, ServerInfo};
