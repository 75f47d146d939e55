//! Per-Client Admission Control
//!
//! The broker admits at most `max_requests` messages per client within any
//! rolling `window`. Each client keeps a log of admission instants; entries
//! older than the window are pruned lazily on the next check, so there is no
//! background work required for correctness.
//!
//! # Example
//!
//! ```
//! use cmdrelay_common::rate_limit::{RateLimiter, RateLimitConfig};
//! use cmdrelay_common::protocol::ClientId;
//! use std::time::{Duration, Instant};
//!
//! let mut limiter = RateLimiter::new(RateLimitConfig::new(2, Duration::from_secs(60)));
//! let client = ClientId::from("a");
//! let now = Instant::now();
//!
//! assert!(limiter.admit(&client, now).is_allowed());
//! assert!(limiter.admit(&client, now).is_allowed());
//! assert!(!limiter.admit(&client, now).is_allowed());
//! ```

use crate::protocol::ClientId;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Default ceiling per window.
pub const DEFAULT_MAX_REQUESTS: u32 = 200;
/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Configuration for the sliding-window limiter.
///
/// # Fields
///
/// * `max_requests` - Maximum admissions per client in any rolling window
/// * `window` - Length of the rolling window
/// * `enabled` - When false every message is admitted and nothing is tracked
#[derive(Clone, Debug, PartialEq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
    pub enabled: bool,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            enabled: true,
        }
    }

    /// Creates a configuration that admits everything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }
}

/// Result of a rate limit check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed,
    RateLimited {
        /// Time until the oldest admission leaves the window
        retry_after: Duration,
    },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Allowed => None,
            Self::RateLimited { retry_after } => Some(*retry_after),
        }
    }
}

/// Admission log for one client.
#[derive(Debug, Default)]
struct RateWindow {
    admitted: VecDeque<Instant>,
}

impl RateWindow {
    fn prune(&mut self, window: Duration, now: Instant) {
        while let Some(oldest) = self.admitted.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    fn last_admitted(&self) -> Option<Instant> {
        self.admitted.back().copied()
    }
}

/// Sliding-window rate limiter keyed by client id.
///
/// Not internally synchronized: the broker owns it and serializes access.
#[derive(Debug)]
pub struct RateLimiter {
    pub config: RateLimitConfig,
    windows: HashMap<ClientId, RateWindow>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(RateLimitConfig::disabled())
    }

    /// Checks whether `client` may send another message at `now`, recording
    /// the admission if so.
    ///
    /// # Arguments
    ///
    /// * `client` - The sending client
    /// * `now` - Current time (passed in so callers and tests control the clock)
    ///
    /// # Returns
    ///
    /// `Allowed`, or `RateLimited` with the time until a slot frees up
    pub fn admit(&mut self, client: &ClientId, now: Instant) -> RateLimitResult {
        if !self.config.enabled {
            return RateLimitResult::Allowed;
        }

        let window = self.config.window;
        let entry = self.windows.entry(client.clone()).or_default();
        entry.prune(window, now);

        if (entry.admitted.len() as u64) < u64::from(self.config.max_requests) {
            entry.admitted.push_back(now);
            RateLimitResult::Allowed
        } else {
            let retry_after = entry
                .admitted
                .front()
                .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(window);
            RateLimitResult::RateLimited { retry_after }
        }
    }

    /// Forgets a client's window, e.g. on disconnect.
    pub fn reset(&mut self, client: &ClientId) {
        self.windows.remove(client);
    }

    /// Drops windows whose last admission is older than the window length.
    ///
    /// # Returns
    ///
    /// The number of windows removed
    pub fn sweep_idle(&mut self, now: Instant) -> usize {
        let window = self.config.window;
        let before = self.windows.len();
        self.windows.retain(|_, w| match w.last_admitted() {
            Some(last) => now.saturating_duration_since(last) < window,
            None => false,
        });
        before - self.windows.len()
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(name: &str) -> ClientId {
        ClientId::from(name)
    }

    #[test]
    fn test_rate_limit_config_default() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_requests, 200);
        assert_eq!(config.window, Duration::from_secs(60));
        assert!(config.enabled);
    }

    #[test]
    fn test_rate_limiter_disabled() {
        let mut limiter = RateLimiter::disabled();
        let c = client("a");
        let now = Instant::now();

        for _ in 0..1000 {
            assert!(limiter.admit(&c, now).is_allowed());
        }
        assert_eq!(limiter.tracked_clients(), 0);
        assert!(!limiter.is_enabled());
    }

    #[test]
    fn test_rate_limiter_basic() {
        let mut limiter = RateLimiter::new(RateLimitConfig::new(10, Duration::from_secs(60)));
        let c = client("a");
        let now = Instant::now();

        for _ in 0..10 {
            assert!(limiter.admit(&c, now).is_allowed());
        }
        let denied = limiter.admit(&c, now);
        assert!(!denied.is_allowed());
        assert_eq!(denied.retry_after(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_window_slides_rather_than_resets() {
        let window = Duration::from_secs(10);
        let mut limiter = RateLimiter::new(RateLimitConfig::new(3, window));
        let c = client("a");
        let t0 = Instant::now();

        assert!(limiter.admit(&c, t0).is_allowed());
        assert!(limiter.admit(&c, t0 + Duration::from_secs(6)).is_allowed());
        assert!(limiter.admit(&c, t0 + Duration::from_secs(7)).is_allowed());
        assert!(!limiter.admit(&c, t0 + Duration::from_secs(8)).is_allowed());

        // Only the t0 admission has aged out.
        assert!(limiter.admit(&c, t0 + Duration::from_secs(10)).is_allowed());
        assert!(!limiter.admit(&c, t0 + Duration::from_secs(11)).is_allowed());

        let retry = limiter.admit(&c, t0 + Duration::from_secs(12)).retry_after();
        assert_eq!(retry, Some(Duration::from_secs(4)));
    }

    #[test]
    fn test_never_exceeds_ceiling_in_any_rolling_window() {
        let window = Duration::from_millis(1000);
        let max = 5u32;
        let mut limiter = RateLimiter::new(RateLimitConfig::new(max, window));
        let c = client("a");
        let t0 = Instant::now();

        let mut admitted = Vec::new();
        for step in 0..400u64 {
            let now = t0 + Duration::from_millis(step * 7);
            if limiter.admit(&c, now).is_allowed() {
                admitted.push(now);
            }
        }

        for (i, start) in admitted.iter().enumerate() {
            let in_window = admitted[i..]
                .iter()
                .take_while(|t| t.duration_since(*start) < window)
                .count();
            assert!(in_window <= max as usize, "window starting at {} admitted {}", i, in_window);
        }
    }

    #[test]
    fn test_clients_are_independent() {
        let mut limiter = RateLimiter::new(RateLimitConfig::new(5, Duration::from_secs(60)));
        let (a, b) = (client("a"), client("b"));
        let now = Instant::now();

        for _ in 0..5 {
            assert!(limiter.admit(&a, now).is_allowed());
            assert!(limiter.admit(&b, now).is_allowed());
        }
        assert!(!limiter.admit(&a, now).is_allowed());
        assert!(!limiter.admit(&b, now).is_allowed());
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn test_reset_and_sweep_idle() {
        let window = Duration::from_secs(5);
        let mut limiter = RateLimiter::new(RateLimitConfig::new(1, window));
        let (a, b) = (client("a"), client("b"));
        let t0 = Instant::now();

        limiter.admit(&a, t0);
        limiter.admit(&b, t0 + Duration::from_secs(4));
        limiter.reset(&a);
        assert!(limiter.admit(&a, t0).is_allowed());

        assert_eq!(limiter.sweep_idle(t0 + Duration::from_secs(6)), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }
}
