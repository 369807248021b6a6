//! DLQ configuration.
//!
//! Durations are stored as plain integers so the structs map directly onto
//! TOML/JSON; accessors convert them to [`Duration`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{DlqError, DlqResult};

/// Backoff configuration for the reprocessing strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds.
    pub max_delay_ms: u64,
    /// Failure count at which automatic retries stop.
    pub max_attempts: u32,
    /// Delay growth factor per failure.
    pub multiplier: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 60 * 60 * 1000, // 1 hour
            max_attempts: 5,
            multiplier: 2.0,
        }
    }
}

impl StrategyConfig {
    /// Base delay as a duration.
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Maximum delay as a duration.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Batch reprocessor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReprocessorConfig {
    /// Maximum entries claimed per batch.
    pub batch_size: usize,
    /// Maximum concurrent publishes within a batch.
    pub concurrency_width: usize,
    /// Interval between batches when running periodically, in milliseconds.
    pub interval_ms: u64,
}

impl Default for ReprocessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency_width: 4,
            interval_ms: 30_000,
        }
    }
}

impl ReprocessorConfig {
    /// Creates a configuration with the given batch size and worker count.
    pub fn new(batch_size: usize, concurrency_width: usize) -> Self {
        Self {
            batch_size,
            concurrency_width,
            ..Default::default()
        }
    }

    /// Sets the periodic interval.
    pub fn interval_ms(mut self, ms: u64) -> Self {
        self.interval_ms = ms;
        self
    }

    /// Interval as a duration.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Monitor thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Alert when more entries than this are stored.
    pub max_messages: usize,
    /// Alert when the oldest entry is older than this, in milliseconds.
    pub max_message_age_ms: u64,
    /// Alert when more security failures than this are stored.
    pub max_security_errors: usize,
    /// Interval between checks, in milliseconds.
    pub check_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_messages: 1000,
            max_message_age_ms: 24 * 60 * 60 * 1000, // 1 day
            max_security_errors: 10,
            check_interval_ms: 60_000,
        }
    }
}

impl MonitorConfig {
    /// Sets the volume threshold.
    pub fn max_messages(mut self, max: usize) -> Self {
        self.max_messages = max;
        self
    }

    /// Sets the age threshold.
    pub fn max_message_age(mut self, age: Duration) -> Self {
        self.max_message_age_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the security failure threshold.
    pub fn max_security_errors(mut self, max: usize) -> Self {
        self.max_security_errors = max;
        self
    }

    /// Sets the check interval.
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Age threshold as a duration.
    pub fn message_age_limit(&self) -> Duration {
        Duration::from_millis(self.max_message_age_ms)
    }

    /// Check interval as a duration.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// Complete DLQ configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DlqConfig {
    /// Reprocessing strategy.
    pub strategy: StrategyConfig,
    /// Batch reprocessor.
    pub reprocessor: ReprocessorConfig,
    /// Monitor.
    pub monitor: MonitorConfig,
}

impl DlqConfig {
    /// Checks that every option is usable.
    pub fn validate(&self) -> DlqResult<()> {
        if self.strategy.max_attempts == 0 {
            return Err(DlqError::Config("strategy.max_attempts must be at least 1".into()));
        }
        if !self.strategy.multiplier.is_finite() || self.strategy.multiplier < 1.0 {
            return Err(DlqError::Config("strategy.multiplier must be >= 1.0".into()));
        }
        if self.strategy.max_delay_ms < self.strategy.base_delay_ms {
            return Err(DlqError::Config(
                "strategy.max_delay_ms must not be below base_delay_ms".into(),
            ));
        }
        if self.reprocessor.batch_size == 0 {
            return Err(DlqError::Config("reprocessor.batch_size must be at least 1".into()));
        }
        if self.reprocessor.concurrency_width == 0 {
            return Err(DlqError::Config(
                "reprocessor.concurrency_width must be at least 1".into(),
            ));
        }
        if self.reprocessor.interval_ms == 0 || self.monitor.check_interval_ms == 0 {
            return Err(DlqError::Config("intervals must be non-zero".into()));
        }
        Ok(())
    }
}
