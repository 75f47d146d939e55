// Copyright 2025 cmdrelay Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::registry::{MetricsConfig, MetricsRegistry};
use crate::snapshot::{MetricsSnapshot, ServerInfo};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sink for broker activity.
///
/// The broker reports every inbound message, failure and command lifecycle
/// event through this trait. Implementations must be cheap to call on the
/// message path.
///
/// # Example
///
/// ```rust
/// use cmdrelay_metrics::{BrokerMetricsCollector, MetricsCollector};
/// use std::time::Duration;
///
/// let collector = BrokerMetricsCollector::new();
/// collector.record_message();
/// collector.record_command("click");
/// collector.record_response("click", Duration::from_millis(5), true);
///
/// assert_eq!(collector.snapshot().total_commands, 1);
/// ```
pub trait MetricsCollector: Send + Sync {
    /// Counts one inbound frame, valid or not.
    fn record_message(&self);

    /// Counts one error reported to a peer.
    fn record_error(&self);

    fn connection_opened(&self);

    fn connection_closed(&self);

    /// Counts a command that was routed to at least one executor.
    fn record_command(&self, name: &str);

    /// Records the outcome and round-trip time of a resolved command.
    ///
    /// # Arguments
    /// * `name` - Command name
    /// * `elapsed` - Time between routing and the first response
    /// * `success` - `true` if the executor reported success
    fn record_response(&self, name: &str, elapsed: Duration, success: bool);

    /// Records a command that hit its deadline.
    fn record_timeout(&self, name: &str);

    /// Advances the throughput sample; called once a second.
    fn tick(&self, now: Instant);

    fn snapshot(&self) -> MetricsSnapshot;

    fn info(&self) -> ServerInfo;
}

/// Metrics collector backed by a [`MetricsRegistry`].
pub struct BrokerMetricsCollector {
    registry: Arc<MetricsRegistry>,
}

impl BrokerMetricsCollector {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(MetricsRegistry::new()),
        }
    }

    pub fn with_config(config: MetricsConfig) -> Self {
        Self {
            registry: Arc::new(MetricsRegistry::with_config(config)),
        }
    }

    /// Creates a collector over an existing registry.
    ///
    /// Useful when the same registry is also read directly, e.g. in tests.
    pub fn with_registry(registry: Arc<MetricsRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }
}

impl Default for BrokerMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector for BrokerMetricsCollector {
    fn record_message(&self) {
        self.registry.record_message();
    }

    fn record_error(&self) {
        self.registry.record_error();
    }

    fn connection_opened(&self) {
        self.registry.connection_opened();
    }

    fn connection_closed(&self) {
        self.registry.connection_closed();
    }

    fn record_command(&self, name: &str) {
        self.registry.record_command(name);
    }

    fn record_response(&self, name: &str, elapsed: Duration, success: bool) {
        self.registry.record_response(name, elapsed, success);
    }

    fn record_timeout(&self, name: &str) {
        self.registry.record_timeout(name);
    }

    fn tick(&self, now: Instant) {
        self.registry.tick(now);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        self.registry.snapshot()
    }

    fn info(&self) -> ServerInfo {
        ServerInfo::new(self.registry.uptime_seconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_shares_registry() {
        let registry = Arc::new(MetricsRegistry::new());
        let collector = BrokerMetricsCollector::with_registry(Arc::clone(&registry));

        collector.record_message();
        collector.record_error();
        assert_eq!(registry.snapshot().total_messages, 1);
        assert_eq!(registry.snapshot().total_errors, 1);
    }

    #[test]
    fn test_info_reports_crate_version() {
        let collector = BrokerMetricsCollector::new();
        let info = collector.info();
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let collector = BrokerMetricsCollector::new();
        collector.record_command("click");
        let value = serde_json::to_value(collector.snapshot()).unwrap();
        assert!(value.get("totalMessages").is_some());
        assert!(value.get("messagesPerSecond").is_some());
        assert!(value.get("avgResponseTime").is_some());
        assert_eq!(value["commandsByType"]["click"]["count"], 1);
    }

    #[test]
    fn test_trait_object() {
        let collector: Arc<dyn MetricsCollector> = Arc::new(BrokerMetricsCollector::new());
        collector.connection_opened();
        assert_eq!(collector.snapshot().active_connections, 1);
    }
}
