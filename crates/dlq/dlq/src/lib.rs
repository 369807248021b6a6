//! # Relay DLQ
//!
//! In-memory dead letter queue engine providing:
//! - Failure classification with a safety-biased default
//! - A concurrency-safe entry store with an explicit claim protocol
//! - Exponential backoff reprocessing strategy
//! - Bounded-concurrency batch reprocessing
//! - Analytics snapshots and threshold monitoring
//!
//! ## Example
//!
//! ```rust,ignore
//! use relay_dlq::{
//!     BatchReprocessor, Cancellation, DeadLetterQueue, ExponentialBackoff,
//!     InMemoryDlqStorage, Message, ReprocessFilter,
//! };
//! use std::sync::Arc;
//!
//! let storage = InMemoryDlqStorage::shared();
//! let strategy = Arc::new(ExponentialBackoff::new());
//! let dlq = DeadLetterQueue::new(storage.clone(), strategy.clone());
//!
//! // Capture a failure from the processing pipeline
//! dlq.capture(Message::new("msg-1", "orders", payload), "connection refused").await?;
//!
//! // Republish whatever is eligible
//! let reprocessor = BatchReprocessor::new(storage, publisher, strategy);
//! reprocessor.reprocess_batch(&Cancellation::never(), &ReprocessFilter::all()).await?;
//! ```

mod analytics;
mod cancel;
mod classifier;
mod collaborators;
mod config;
mod entry;
mod error;
mod monitor;
mod queue;
mod reprocessor;
mod strategy;
pub mod store;

pub use analytics::{AnalyticsAggregator, DlqAnalytics};
pub use cancel::{cancellation, CancelHandle, Cancellation};
pub use classifier::{describe_error, ErrorClassifier};
pub use collaborators::{Alerting, Publisher};
pub use config::{DlqConfig, MonitorConfig, ReprocessorConfig, StrategyConfig};
pub use entry::{DlqEntry, ErrorClassification, Message};
pub use error::{DlqError, DlqResult, PublishFailure};
pub use monitor::{
    Alert, AlertSeverity, Monitor, MonitorState, HIGH_VOLUME_ALERT, OLD_MESSAGES_ALERT,
    SECURITY_ERRORS_ALERT,
};
pub use queue::{DeadLetterQueue, DlqQuery};
pub use reprocessor::{BatchReport, BatchReprocessor, ReprocessFilter};
pub use store::{ClaimToken, ClaimedBatch, DlqStorage, InMemoryDlqStorage};
pub use strategy::{ExponentialBackoff, ReprocessingStrategy};
