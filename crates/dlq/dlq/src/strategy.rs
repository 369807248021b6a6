//! Reprocessing strategies for dead-lettered entries.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::StrategyConfig;
use crate::entry::DlqEntry;

/// Decides whether and when an entry may be retried.
pub trait ReprocessingStrategy: Send + Sync {
    /// Returns the backoff delay after `failure_count` failures.
    fn delay_for(&self, failure_count: u32) -> Duration;

    /// Returns the maximum number of failures before giving up.
    fn max_attempts(&self) -> u32;

    /// Checks if the entry may be retried at all.
    ///
    /// Security and permanent failures are never retried automatically,
    /// regardless of how many attempts remain.
    fn should_reprocess(&self, entry: &DlqEntry) -> bool {
        entry.classification.is_retryable() && entry.failure_count < self.max_attempts()
    }

    /// Returns the earliest instant the entry should be retried.
    fn next_attempt_time(&self, entry: &DlqEntry) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay_for(entry.failure_count))
            .unwrap_or(chrono::Duration::MAX);
        entry
            .last_failure
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Checks if the entry is retryable and its backoff has elapsed at `now`.
    fn is_due(&self, entry: &DlqEntry, now: DateTime<Utc>) -> bool {
        self.should_reprocess(entry) && self.next_attempt_time(entry) <= now
    }
}

/// Exponential backoff reprocessing strategy.
///
/// Delay grows as `base_delay * multiplier^failure_count`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Base delay.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Failure count at which retries stop.
    pub max_attempts: u32,
    /// Growth factor per failure.
    pub multiplier: f64,
}

impl ExponentialBackoff {
    /// Creates a new exponential backoff strategy.
    pub fn new() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3600), // 1 hour
            max_attempts: 5,
            multiplier: 2.0,
        }
    }

    /// Creates a strategy from configuration.
    pub fn from_config(config: &StrategyConfig) -> Self {
        Self::new()
            .base_delay(config.base_delay())
            .max_delay(config.max_delay())
            .max_attempts(config.max_attempts)
            .multiplier(config.multiplier)
    }

    /// Sets the base delay.
    pub fn base_delay(mut self, base: Duration) -> Self {
        self.base_delay = base;
        self
    }

    /// Sets the maximum delay.
    pub fn max_delay(mut self, max: Duration) -> Self {
        self.max_delay = max;
        self
    }

    /// Sets the maximum attempts.
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Sets the multiplier. Values below 1.0 are raised to 1.0 so the delay
    /// never shrinks as failures accumulate.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_finite() {
            multiplier.max(1.0)
        } else {
            1.0
        };
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl ReprocessingStrategy for ExponentialBackoff {
    fn delay_for(&self, failure_count: u32) -> Duration {
        let exponent = i32::try_from(failure_count).unwrap_or(i32::MAX);
        let nanos = self.base_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        let cap = self.max_delay.as_nanos() as f64;

        if !nanos.is_finite() || nanos >= cap {
            self.max_delay
        } else {
            Duration::from_nanos(nanos as u64)
        }
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
