use std::time::{Duration, Instant};
use tracing::{info, trace};

use crate::broker::SharedBroker;

/// Periodic liveness probing of every open connection.
///
/// Each tick evicts connections that stayed silent since the previous tick
/// and sends a `ping` to the rest. A silent connection is therefore gone
/// within two intervals.
pub struct LivenessMonitor {
    broker: SharedBroker,
    interval: Duration,
}

impl LivenessMonitor {
    /// Creates a new liveness monitor.
    ///
    /// # Arguments
    /// * `broker` - The broker whose connections are probed
    /// * `interval` - Time between probe rounds
    pub fn new(broker: SharedBroker, interval: Duration) -> Self {
        Self { broker, interval }
    }

    /// Starts the monitor task.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        // The first tick completes immediately; skip it so fresh connections
        // get a full interval before their first probe.
        interval.tick().await;

        loop {
            interval.tick().await;
            self.probe().await;
        }
    }

    async fn probe(&self) {
        let report = self.broker.lock().await.heartbeat(Instant::now());
        if !report.evicted.is_empty() {
            info!(
                evicted = report.evicted.len(),
                "Evicted unresponsive connections"
            );
        }
        trace!(probed = report.probed, "Liveness round complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Broker;
    use crate::client::Outbound;
    use crate::config::BrokerConfig;
    use cmdrelay_common::Envelope;
    use cmdrelay_metrics::BrokerMetricsCollector;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_silent_connection_evicted_after_two_rounds() {
        let broker = Broker::new(
            &BrokerConfig::default(),
            Arc::new(BrokerMetricsCollector::new()),
        )
        .into_shared();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = broker.lock().await.connect(tx, Instant::now());

        let monitor = LivenessMonitor::new(broker.clone(), Duration::from_millis(10));
        monitor.probe().await;
        monitor.probe().await;

        assert!(!broker.lock().await.registry().is_connected(&id));

        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        assert!(matches!(frames[0], Outbound::Envelope(Envelope::Connection { .. })));
        assert!(matches!(frames[1], Outbound::Envelope(Envelope::Ping { .. })));
        assert!(matches!(frames.last(), Some(Outbound::Close(_))));
    }

    #[tokio::test]
    async fn test_spawned_monitor_evicts() {
        let broker = Broker::new(
            &BrokerConfig::default(),
            Arc::new(BrokerMetricsCollector::new()),
        )
        .into_shared();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = broker.lock().await.connect(tx, Instant::now());

        let handle = LivenessMonitor::new(broker.clone(), Duration::from_millis(20)).spawn();
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.abort();

        assert!(!broker.lock().await.registry().is_connected(&id));
    }
}
