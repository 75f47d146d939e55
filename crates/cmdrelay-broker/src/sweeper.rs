use std::time::{Duration, Instant};
use tracing::debug;

use crate::broker::SharedBroker;

/// Background housekeeping on a fixed tick.
///
/// Fails commands past their deadline, rolls the throughput meter and
/// forgets rate windows of clients that have gone quiet.
pub struct TimeoutSweeper {
    broker: SharedBroker,
    interval: Duration,
}

impl TimeoutSweeper {
    pub fn new(broker: SharedBroker, interval: Duration) -> Self {
        Self { broker, interval }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.sweep(Instant::now()).await;
        }
    }

    async fn sweep(&self, now: Instant) {
        let mut broker = self.broker.lock().await;
        let timed_out = broker.sweep_expired(now);
        let idle = broker.sweep_idle_rate_windows(now);
        broker.metrics().tick(now);

        if timed_out > 0 || idle > 0 {
            debug!(timed_out, idle_rate_windows = idle, "Sweep complete");
        }
    }
}
