//! # Relay DLQ Runner
//!
//! Hosts a dead letter queue in a standalone process: the batch reprocessor
//! and the threshold monitor run side by side until shutdown.

mod config;

pub use config::{load_config, parse_config, ConfigError, RunnerConfig, RunnerSettings};

use async_trait::async_trait;
use relay_dlq::{
    Alerting, AnalyticsAggregator, BatchReprocessor, Cancellation, DeadLetterQueue, DlqResult,
    DlqStorage, ExponentialBackoff, InMemoryDlqStorage, Message, Monitor, Publisher,
    ReprocessingStrategy,
};
use std::sync::Arc;

/// Publisher that only records republished messages in the log.
#[derive(Debug, Default)]
pub struct LoggingPublisher;

#[async_trait]
impl Publisher for LoggingPublisher {
    async fn publish(&self, topic: &str, message: &Message) -> DlqResult<()> {
        tracing::info!(
            "Republished message {} to {} ({} bytes)",
            message.id,
            topic,
            message.payload.len()
        );
        Ok(())
    }
}

/// Alerting backed by the log.
#[derive(Debug, Default)]
pub struct LoggingAlerting;

#[async_trait]
impl Alerting for LoggingAlerting {
    async fn send_warning(&self, kind: &str, text: &str) -> DlqResult<()> {
        tracing::warn!(alert = kind, "{}", text);
        Ok(())
    }

    async fn send_critical(&self, kind: &str, text: &str) -> DlqResult<()> {
        tracing::error!(alert = kind, "{}", text);
        Ok(())
    }

    async fn send_security(&self, kind: &str, text: &str) -> DlqResult<()> {
        tracing::error!(alert = kind, security = true, "{}", text);
        Ok(())
    }
}

/// A configured DLQ with its background loops.
pub struct DlqRunner {
    config: RunnerConfig,
    dlq: DeadLetterQueue,
    reprocessor: BatchReprocessor,
    monitor: Monitor,
}

impl DlqRunner {
    /// Creates a runner over an in-memory store with log-backed collaborators.
    pub fn new(config: RunnerConfig) -> Self {
        Self::with_collaborators(
            config,
            InMemoryDlqStorage::shared(),
            Arc::new(LoggingPublisher),
            Arc::new(LoggingAlerting),
        )
    }

    /// Creates a runner with explicit collaborators.
    pub fn with_collaborators(
        config: RunnerConfig,
        storage: Arc<dyn DlqStorage>,
        publisher: Arc<dyn Publisher>,
        alerting: Arc<dyn Alerting>,
    ) -> Self {
        let strategy: Arc<dyn ReprocessingStrategy> =
            Arc::new(ExponentialBackoff::from_config(&config.dlq.strategy));

        let dlq = DeadLetterQueue::new(Arc::clone(&storage), Arc::clone(&strategy));
        let reprocessor = BatchReprocessor::with_config(
            Arc::clone(&storage),
            publisher,
            strategy,
            config.dlq.reprocessor.clone(),
        );
        let monitor = Monitor::new(
            AnalyticsAggregator::new(storage),
            alerting,
            config.dlq.monitor.clone(),
        );

        Self {
            config,
            dlq,
            reprocessor,
            monitor,
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// The queue failures are captured into.
    pub fn dlq(&self) -> &DeadLetterQueue {
        &self.dlq
    }

    /// The batch reprocessor.
    pub fn reprocessor(&self) -> &BatchReprocessor {
        &self.reprocessor
    }

    /// The monitor.
    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Runs the enabled loops until `cancel` fires.
    pub async fn run(&self, cancel: Cancellation) {
        let settings = &self.config.runner;
        tracing::info!(
            "Starting relay DLQ runner (reprocessor: {}, monitor: {})",
            settings.enable_reprocessor,
            settings.enable_monitor
        );

        let reprocess = async {
            if settings.enable_reprocessor {
                self.reprocessor.run(cancel.clone()).await;
            }
        };
        let monitor = async {
            if settings.enable_monitor {
                self.monitor.run(cancel.clone()).await;
            }
        };
        tokio::join!(reprocess, monitor);

        tracing::info!("Relay DLQ runner stopped");
    }
}
