use crate::snapshot::{CommandMetrics, MetricsSnapshot};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock as StdRwLock};
use std::time::Instant;

/// Upper bounds (ms) of the response-time buckets. Anything slower lands in
/// the overflow bucket.
const BUCKET_BOUNDS_MS: [u64; 15] = [
    1, 2, 5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000, 60_000,
];
const NUM_BUCKETS: usize = BUCKET_BOUNDS_MS.len() + 1;

/// Limits on what the registry keeps in memory.
///
/// # Fields
///
/// - **max_command_types**: Distinct command names tracked before new names
///   are folded into `"other"`
/// - **response_window**: Number of most recent response times averaged for
///   `avgResponseTime`
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub max_command_types: usize,
    pub response_window: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_command_types: 500,
            response_window: 100,
        }
    }
}

/// Bucketed response-time distribution.
///
/// Recording is a single atomic increment; percentiles are reported as the
/// upper bound of the bucket containing the requested rank.
#[derive(Debug)]
struct ResponseHistogram {
    buckets: [AtomicU64; NUM_BUCKETS],
    samples: AtomicU64,
}

impl ResponseHistogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            samples: AtomicU64::new(0),
        }
    }

    fn bucket_for(elapsed_ms: u64) -> usize {
        BUCKET_BOUNDS_MS
            .iter()
            .position(|bound| elapsed_ms <= *bound)
            .unwrap_or(NUM_BUCKETS - 1)
    }

    fn record(&self, elapsed_ms: u64) {
        self.buckets[Self::bucket_for(elapsed_ms)].fetch_add(1, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    fn percentile(&self, percentile: u64) -> u64 {
        let total = self.samples.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        let rank = (total * percentile).div_ceil(100).max(1);
        let mut seen = 0;
        for (idx, bucket) in self.buckets.iter().enumerate() {
            seen += bucket.load(Ordering::Relaxed);
            if seen >= rank {
                return BUCKET_BOUNDS_MS
                    .get(idx)
                    .copied()
                    .unwrap_or(BUCKET_BOUNDS_MS[BUCKET_BOUNDS_MS.len() - 1]);
            }
        }
        BUCKET_BOUNDS_MS[BUCKET_BOUNDS_MS.len() - 1]
    }
}

#[derive(Debug)]
struct CommandStats {
    count: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    latencies: ResponseHistogram,
}

impl CommandStats {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            latencies: ResponseHistogram::new(),
        }
    }

    fn snapshot(&self) -> CommandMetrics {
        CommandMetrics {
            count: self.count.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            p50_ms: self.latencies.percentile(50),
            p95_ms: self.latencies.percentile(95),
        }
    }
}

/// Message throughput sampled once per tick.
#[derive(Debug)]
struct ThroughputSample {
    at: Instant,
    total_messages: u64,
    per_second: f64,
}

/// Thread-safe metrics storage for the broker.
///
/// Counters are lock-free atomics. Per-command stats sit behind an `RwLock`
/// that is only written when a new command name appears. The rolling
/// response-time window and throughput sample each take a short mutex.
///
/// # Example
///
/// ```rust
/// use cmdrelay_metrics::MetricsRegistry;
/// use std::time::Duration;
///
/// let registry = MetricsRegistry::new();
/// registry.record_message();
/// registry.record_command("click");
/// registry.record_response("click", Duration::from_millis(12), true);
///
/// let snapshot = registry.snapshot();
/// assert_eq!(snapshot.total_commands, 1);
/// assert_eq!(snapshot.avg_response_time, 12.0);
/// ```
#[derive(Debug)]
pub struct MetricsRegistry {
    total_messages: AtomicU64,
    total_errors: AtomicU64,
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    total_commands: AtomicU64,
    commands: StdRwLock<HashMap<String, Arc<CommandStats>>>,
    recent_responses: Mutex<VecDeque<u64>>,
    throughput: Mutex<ThroughputSample>,
    start_time: Instant,
    config: MetricsConfig,
}

const OVERFLOW_COMMAND: &str = "other";

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_config(MetricsConfig::default())
    }

    pub fn with_config(config: MetricsConfig) -> Self {
        let now = Instant::now();
        Self {
            total_messages: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            total_commands: AtomicU64::new(0),
            commands: StdRwLock::new(HashMap::new()),
            recent_responses: Mutex::new(VecDeque::with_capacity(config.response_window)),
            throughput: Mutex::new(ThroughputSample {
                at: now,
                total_messages: 0,
                per_second: 0.0,
            }),
            start_time: now,
            config,
        }
    }

    pub fn record_message(&self) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // Saturate so a double close can never wrap the gauge.
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Counts a routed command under its name.
    pub fn record_command(&self, name: &str) {
        self.total_commands.fetch_add(1, Ordering::Relaxed);
        self.command_stats(name).count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the round trip of a resolved command.
    ///
    /// # Arguments
    /// * `name` - Command name
    /// * `elapsed` - Time from routing to response
    /// * `success` - Whether the executor reported success
    pub fn record_response(&self, name: &str, elapsed: std::time::Duration, success: bool) {
        let elapsed_ms = elapsed.as_millis() as u64;
        let stats = self.command_stats(name);
        stats.latencies.record(elapsed_ms);
        if !success {
            stats.failures.fetch_add(1, Ordering::Relaxed);
        }

        let mut recent = self
            .recent_responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if recent.len() >= self.config.response_window {
            recent.pop_front();
        }
        recent.push_back(elapsed_ms);
    }

    pub fn record_timeout(&self, name: &str) {
        self.command_stats(name)
            .timeouts
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Recomputes messages-per-second from the messages seen since the
    /// previous tick. Called once a second by the broker.
    pub fn tick(&self, now: Instant) {
        let total = self.total_messages.load(Ordering::Relaxed);
        let mut sample = self
            .throughput
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let elapsed = now.saturating_duration_since(sample.at).as_secs_f64();
        if elapsed > 0.0 {
            sample.per_second = total.saturating_sub(sample.total_messages) as f64 / elapsed;
            sample.at = now;
            sample.total_messages = total;
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let commands_by_type: BTreeMap<String, CommandMetrics> = self
            .commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, stats)| (name.clone(), stats.snapshot()))
            .collect();

        let avg_response_time = {
            let recent = self
                .recent_responses
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if recent.is_empty() {
                0.0
            } else {
                recent.iter().sum::<u64>() as f64 / recent.len() as f64
            }
        };

        let messages_per_second = self
            .throughput
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .per_second;

        MetricsSnapshot {
            total_messages: self.total_messages.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_commands: self.total_commands.load(Ordering::Relaxed),
            commands_by_type,
            messages_per_second,
            avg_response_time,
            uptime_seconds: self.uptime_seconds(),
        }
    }

    fn command_stats(&self, name: &str) -> Arc<CommandStats> {
        if let Some(stats) = self
            .commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Arc::clone(stats);
        }

        let mut commands = self
            .commands
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let key = if commands.len() >= self.config.max_command_types && !commands.contains_key(name)
        {
            OVERFLOW_COMMAND
        } else {
            name
        };
        Arc::clone(
            commands
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(CommandStats::new())),
        )
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
