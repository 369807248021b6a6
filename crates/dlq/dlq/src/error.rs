//! DLQ error types.

use thiserror::Error;

/// Result type for DLQ operations.
pub type DlqResult<T> = Result<T, DlqError>;

/// Error type for dead letter queue operations.
#[derive(Debug, Error)]
pub enum DlqError {
    /// No entry exists for the given message ID.
    #[error("Entry not found: {0}")]
    NotFound(String),

    /// Entry violates a structural invariant and was rejected.
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    /// Publisher rejected a republish attempt.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Alerting collaborator failed to deliver a notification.
    #[error("Alert failed: {0}")]
    Alert(String),

    /// One or more entries in a reprocessing batch failed to republish.
    #[error("Batch failed: {} of {attempted} publishes failed", failures.len())]
    BatchFailed {
        /// Number of publishes dispatched in the batch.
        attempted: usize,
        /// Per-entry failures.
        failures: Vec<PublishFailure>,
    },

    /// Entry is already claimed by an in-flight reprocessing attempt.
    #[error("Entry in flight: {0}")]
    InFlight(String),

    /// Entry may not be retried under the active strategy.
    #[error("Entry not eligible for reprocessing: {0}")]
    NotEligible(String),

    /// Operation was cancelled before it could start.
    #[error("Operation cancelled")]
    Cancelled,

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A single failed republish inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishFailure {
    /// Message ID of the entry that failed.
    pub message_id: String,
    /// Topic the message was published to.
    pub topic: String,
    /// Error reported by the publisher.
    pub error: String,
}

impl DlqError {
    /// Returns the per-entry failures when this is a batch error.
    pub fn failures(&self) -> &[PublishFailure] {
        match self {
            DlqError::BatchFailed { failures, .. } => failures,
            _ => &[],
        }
    }
}

impl From<serde_json::Error> for DlqError {
    fn from(err: serde_json::Error) -> Self {
        DlqError::Serialization(err.to_string())
    }
}
