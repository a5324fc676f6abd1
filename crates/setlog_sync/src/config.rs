//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for the sync driver and reconciler.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum number of operations in flight on the network at once.
    /// Per-entity exclusion still applies within the window.
    pub max_in_flight: usize,
    /// Retry configuration for transient failures.
    pub retry: RetryConfig,
    /// Reconciler grace periods.
    pub reconcile: ReconcileConfig,
}

impl SyncConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_in_flight: 4,
            retry: RetryConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }

    /// Sets the in-flight fan-out bound.
    #[must_use]
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max.max(1);
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the reconciler configuration.
    #[must_use]
    pub fn with_reconcile(mut self, reconcile: ReconcileConfig) -> Self {
        self.reconcile = reconcile;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum delivery attempts before an operation is marked failed.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the computed delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with the given attempt budget.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration that fails on the first transient error.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Disables jitter (deterministic delays, mainly for tests).
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Calculates the backoff delay after `attempts` charged attempts.
    ///
    /// The first attempt carries no delay; each subsequent attempt
    /// doubles the base delay (by default) up to `max_delay`, plus up to
    /// 25% jitter.
    #[must_use]
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempts.saturating_sub(1) as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = capped * 0.25 * pseudo_jitter();
            Duration::from_secs_f64(capped + jitter)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(8)
    }
}

/// Grace periods for reconciliation passes.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// How long an operation may sit in `Failed` before it is surfaced
    /// as stale (and auto-retried once if connectivity is present).
    pub failed_grace: Duration,
    /// How long `Done` operations are retained for diagnostics before
    /// being purged.
    pub done_retention: Duration,
    /// Whether stale failed operations are re-triggered automatically.
    pub auto_retry_failed: bool,
}

impl ReconcileConfig {
    /// Sets the failed-operation grace period.
    #[must_use]
    pub fn with_failed_grace(mut self, grace: Duration) -> Self {
        self.failed_grace = grace;
        self
    }

    /// Sets the done-operation retention period.
    #[must_use]
    pub fn with_done_retention(mut self, retention: Duration) -> Self {
        self.done_retention = retention;
        self
    }

    /// Enables or disables automatic re-trigger of stale failures.
    #[must_use]
    pub fn with_auto_retry_failed(mut self, enabled: bool) -> Self {
        self.auto_retry_failed = enabled;
        self
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            failed_grace: Duration::from_secs(300),
            done_retention: Duration::from_secs(3600),
            auto_retry_failed: true,
        }
    }
}

/// Simple deterministic jitter source (no external RNG dependency).
fn pseudo_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_max_in_flight(8)
            .with_retry(RetryConfig::new(3));

        assert_eq!(config.max_in_flight, 8);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn max_in_flight_floor() {
        assert_eq!(SyncConfig::new().with_max_in_flight(0).max_in_flight, 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(60))
            .without_jitter();

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
        // 2^9 = 512s, capped at 60s.
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn backoff_is_monotonic() {
        let config = RetryConfig::new(12).without_jitter();
        let mut previous = Duration::ZERO;
        for attempts in 0..12 {
            let delay = config.delay_for_attempt(attempts);
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = RetryConfig::new(5).with_initial_delay(Duration::from_millis(100));

        let delay = config.delay_for_attempt(1);
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(125));
    }

    #[test]
    fn no_retry_budget() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay_for_attempt(1), Duration::ZERO);
    }
}
