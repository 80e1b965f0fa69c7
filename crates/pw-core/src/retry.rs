//! Exponential backoff and bounded retry windows
//!
//! Target resolution and dropped transports retry with jittered
//! exponential backoff, bounded either by a wall-clock window (cluster
//! resolution) or by an attempt count (shell reconnection).

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::serde_utils::duration_secs;

/// Backoff and retry-window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,

    /// Total window after which resolution retries give up
    #[serde(with = "duration_secs")]
    pub window: Duration,

    /// Maximum reconnection attempts for an established transport
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
            window: Duration::from_secs(120),
            max_attempts: 5,
        }
    }
}

/// Exponential backoff with jitter
pub struct ExponentialBackoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    /// Start a backoff schedule at the configured initial delay
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            next: config.initial,
            max: config.max,
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }

    /// The delay to wait before the next attempt, advancing the
    /// schedule. Jitter stretches each delay by up to `jitter`× its
    /// base value so synchronized retries fan out.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.next;
        self.next = base.mul_f64(self.multiplier).min(self.max);

        if self.jitter > 0.0 {
            base.mul_f64(1.0 + self.jitter * rand::random::<f64>())
        } else {
            base
        }
    }
}

/// Attempt-bounded reconnection accounting for a long-lived transport.
///
/// Consecutive failures count against `max_attempts`; a connection
/// that served traffic resets both the counter and the backoff, so a
/// transport that reconnects occasionally over a long lifetime never
/// exhausts its budget cumulatively.
pub struct ReconnectPolicy {
    config: RetryConfig,
    backoff: ExponentialBackoff,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Fresh policy with no failures recorded
    pub fn new(config: RetryConfig) -> Self {
        let backoff = ExponentialBackoff::from_config(&config);
        Self {
            config,
            backoff,
            attempts: 0,
        }
    }

    /// Consecutive failures recorded so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// A connection served traffic; start counting afresh
    pub fn record_success(&mut self) {
        self.attempts = 0;
        self.backoff = ExponentialBackoff::from_config(&self.config);
    }

    /// Record one failure: the delay before the next attempt, or
    /// `None` once attempts are exhausted
    pub fn next_retry(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.attempts >= self.config.max_attempts {
            None
        } else {
            Some(self.backoff.next_delay())
        }
    }
}

/// Wall-clock bound on a retry loop
#[derive(Debug, Clone, Copy)]
pub struct RetryWindow {
    started: Instant,
    window: Duration,
}

impl RetryWindow {
    /// Start a new window now
    pub fn start(window: Duration) -> Self {
        Self {
            started: Instant::now(),
            window,
        }
    }

    /// Whether the window has elapsed
    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.window
    }

    /// Time remaining before the window elapses
    pub fn remaining(&self) -> Duration {
        self.window.saturating_sub(self.started.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial_ms: u64, max_ms: u64, jitter: f64, max_attempts: u32) -> RetryConfig {
        RetryConfig {
            initial: Duration::from_millis(initial_ms),
            max: Duration::from_millis(max_ms),
            multiplier: 2.0,
            jitter,
            window: Duration::from_secs(1),
            max_attempts,
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let mut backoff = ExponentialBackoff::from_config(&config(100, 350, 0.0, 5));

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        // initial == max keeps the base constant across draws
        let mut backoff = ExponentialBackoff::from_config(&config(100, 100, 0.5, 5));

        for _ in 0..20 {
            let d = backoff.next_delay();
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_reconnect_policy_exhausts_consecutive_failures() {
        let mut policy = ReconnectPolicy::new(config(1, 4, 0.0, 3));

        assert_eq!(policy.next_retry(), Some(Duration::from_millis(1)));
        assert_eq!(policy.next_retry(), Some(Duration::from_millis(2)));
        assert_eq!(policy.next_retry(), None);
        assert_eq!(policy.attempts(), 3);
    }

    #[test]
    fn test_reconnect_policy_resets_after_success() {
        let mut policy = ReconnectPolicy::new(config(1, 4, 0.0, 3));

        assert!(policy.next_retry().is_some());
        assert!(policy.next_retry().is_some());
        policy.record_success();

        // The budget and the backoff schedule both start over
        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.next_retry(), Some(Duration::from_millis(1)));
        assert_eq!(policy.next_retry(), Some(Duration::from_millis(2)));
        assert_eq!(policy.next_retry(), None);
    }

    #[test]
    fn test_window_expiry() {
        let window = RetryWindow::start(Duration::from_secs(0));
        assert!(window.expired());
        assert_eq!(window.remaining(), Duration::ZERO);

        let window = RetryWindow::start(Duration::from_secs(3600));
        assert!(!window.expired());
        assert!(window.remaining() > Duration::ZERO);
    }
}
