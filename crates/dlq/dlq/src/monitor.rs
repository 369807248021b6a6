//! Threshold monitoring over DLQ analytics.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::analytics::{AnalyticsAggregator, DlqAnalytics};
use crate::cancel::Cancellation;
use crate::collaborators::Alerting;
use crate::config::MonitorConfig;
use crate::entry::ErrorClassification;
use crate::error::DlqResult;

/// Alert kind raised when the DLQ holds too many entries.
pub const HIGH_VOLUME_ALERT: &str = "dlq_high_volume";
/// Alert kind raised when the oldest entry is too old.
pub const OLD_MESSAGES_ALERT: &str = "dlq_old_messages";
/// Alert kind raised when too many security failures are stored.
pub const SECURITY_ERRORS_ALERT: &str = "dlq_security_errors";

/// Lifecycle of the monitor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Waiting for the next check.
    Idle,
    /// Evaluating thresholds.
    Checking,
    /// Cancelled; terminal.
    Stopped,
}

/// Severity channel an alert is sent through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Warning,
    Critical,
    Security,
}

/// An alert produced by one check cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub kind: &'static str,
    pub text: String,
}

/// Periodically checks DLQ analytics against thresholds and raises alerts.
pub struct Monitor {
    analytics: AnalyticsAggregator,
    alerting: Arc<dyn Alerting>,
    config: MonitorConfig,
    state: watch::Sender<MonitorState>,
}

impl Monitor {
    /// Creates a monitor.
    pub fn new(
        analytics: AnalyticsAggregator,
        alerting: Arc<dyn Alerting>,
        config: MonitorConfig,
    ) -> Self {
        let (state, _) = watch::channel(MonitorState::Idle);
        Self {
            analytics,
            alerting,
            config,
            state,
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> MonitorState {
        *self.state.borrow()
    }

    /// Subscribes to state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<MonitorState> {
        self.state.subscribe()
    }

    /// Evaluates every threshold rule against one analytics snapshot.
    ///
    /// Rules are independent, so any subset of them may fire.
    pub fn evaluate(&self, analytics: &DlqAnalytics) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if analytics.total_count > self.config.max_messages {
            alerts.push(Alert {
                severity: AlertSeverity::Warning,
                kind: HIGH_VOLUME_ALERT,
                text: format!(
                    "DLQ holds {} messages (threshold {})",
                    analytics.total_count, self.config.max_messages
                ),
            });
        }

        if let Some(age) = analytics.oldest_age(Utc::now()) {
            let limit = chrono::Duration::from_std(self.config.message_age_limit())
                .unwrap_or(chrono::Duration::MAX);
            if age > limit {
                alerts.push(Alert {
                    severity: AlertSeverity::Critical,
                    kind: OLD_MESSAGES_ALERT,
                    text: format!(
                        "Oldest DLQ message failed {}ms ago (threshold {}ms)",
                        age.num_milliseconds(),
                        limit.num_milliseconds()
                    ),
                });
            }
        }

        let security = analytics.count_for(ErrorClassification::Security);
        if security > self.config.max_security_errors {
            alerts.push(Alert {
                severity: AlertSeverity::Security,
                kind: SECURITY_ERRORS_ALERT,
                text: format!(
                    "DLQ holds {} security failures (threshold {})",
                    security, self.config.max_security_errors
                ),
            });
        }

        alerts
    }

    /// Runs one check cycle and returns the alerts raised.
    ///
    /// Alert delivery failures are logged and do not fail the check.
    pub async fn check(&self) -> DlqResult<Vec<Alert>> {
        self.set_state(MonitorState::Checking);
        let result = self.run_check().await;
        self.set_state(MonitorState::Idle);
        result
    }

    async fn run_check(&self) -> DlqResult<Vec<Alert>> {
        let analytics = self.analytics.get_analytics().await?;
        let alerts = self.evaluate(&analytics);

        for alert in &alerts {
            let sent = match alert.severity {
                AlertSeverity::Warning => self.alerting.send_warning(alert.kind, &alert.text).await,
                AlertSeverity::Critical => self.alerting.send_critical(alert.kind, &alert.text).await,
                AlertSeverity::Security => self.alerting.send_security(alert.kind, &alert.text).await,
            };
            if let Err(e) = sent {
                tracing::error!("Failed to send {} alert: {}", alert.kind, e);
            }
        }

        Ok(alerts)
    }

    /// Checks on the configured interval until `cancel` fires.
    ///
    /// The first check runs immediately.
    pub async fn run(&self, cancel: Cancellation) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("DLQ monitor started (interval {:?})", self.config.interval());

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.check().await {
                tracing::warn!("DLQ monitor check failed: {}", e);
            }
        }

        self.set_state(MonitorState::Stopped);
        tracing::info!("DLQ monitor stopped");
    }

    // Stopped is terminal; later checks leave it in place.
    fn set_state(&self, state: MonitorState) {
        self.state.send_if_modified(|current| {
            if *current == MonitorState::Stopped || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}
