//! Messages and dead letter entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// A message that failed processing.
///
/// The payload is opaque at this layer; decoding belongs to the pipeline
/// that produced the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Broker-assigned message identifier.
    pub id: String,
    /// Topic the message was originally consumed from.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Transport headers.
    pub headers: HashMap<String, String>,
    /// When the message was produced.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Creates a new message timestamped now.
    pub fn new(id: impl Into<String>, topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            payload: payload.into(),
            headers: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Why a message failed, used to gate automatic retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClassification {
    /// Transient infrastructure failure (network, broker unavailable).
    Temporary,
    /// Deadline or timeout exceeded.
    Timeout,
    /// Payload or input failed validation.
    Validation,
    /// Authorization or permission failure. Never retried automatically.
    Security,
    /// Unknown or unrecoverable failure. Never retried automatically.
    Permanent,
}

impl ErrorClassification {
    /// All classifications in declaration order.
    pub const ALL: [ErrorClassification; 5] = [
        ErrorClassification::Temporary,
        ErrorClassification::Timeout,
        ErrorClassification::Validation,
        ErrorClassification::Security,
        ErrorClassification::Permanent,
    ];

    /// Whether entries with this classification may be retried at all.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorClassification::Security | ErrorClassification::Permanent)
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClassification::Temporary => "temporary",
            ErrorClassification::Timeout => "timeout",
            ErrorClassification::Validation => "validation",
            ErrorClassification::Security => "security",
            ErrorClassification::Permanent => "permanent",
        }
    }
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dead-lettered message with its failure history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqEntry {
    /// The message that failed.
    pub message: Message,
    /// Most recent failure description.
    pub failure_reason: String,
    /// Classification of the most recent failure.
    pub classification: ErrorClassification,
    /// Number of recorded processing failures (at least 1).
    pub failure_count: u32,
    /// When the message first failed.
    pub first_failure: DateTime<Utc>,
    /// When the message most recently failed.
    pub last_failure: DateTime<Utc>,
    /// Free-form diagnostic metadata.
    pub metadata: HashMap<String, Value>,
}

impl DlqEntry {
    /// Creates an entry for a first failure happening now.
    pub fn new(
        message: Message,
        failure_reason: impl Into<String>,
        classification: ErrorClassification,
    ) -> Self {
        let now = Utc::now();
        Self {
            message,
            failure_reason: failure_reason.into(),
            classification,
            failure_count: 1,
            first_failure: now,
            last_failure: now,
            metadata: HashMap::new(),
        }
    }

    /// The message ID this entry is keyed by.
    pub fn id(&self) -> &str {
        &self.message.id
    }

    /// The topic of the wrapped message.
    pub fn topic(&self) -> &str {
        &self.message.topic
    }

    /// Sets the failure count.
    pub fn with_failure_count(mut self, count: u32) -> Self {
        self.failure_count = count;
        self
    }

    /// Sets both failure timestamps to the same instant.
    pub fn failed_at(mut self, at: DateTime<Utc>) -> Self {
        self.first_failure = at;
        self.last_failure = at;
        self
    }

    /// Sets the first and last failure timestamps.
    pub fn with_failure_window(mut self, first: DateTime<Utc>, last: DateTime<Utc>) -> Self {
        self.first_failure = first;
        self.last_failure = last;
        self
    }

    /// Adds a metadata value.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Checks structural invariants, returning a description of the first violation.
    pub fn validate(&self) -> Result<(), String> {
        if self.message.id.is_empty() {
            return Err("message id is empty".to_string());
        }
        if self.failure_count == 0 {
            return Err(format!("entry {} has failure_count 0", self.message.id));
        }
        if self.last_failure < self.first_failure {
            return Err(format!(
                "entry {} has last_failure before first_failure",
                self.message.id
            ));
        }
        Ok(())
    }

    /// Folds a later failure for the same message into this entry.
    pub(crate) fn merge(&mut self, later: DlqEntry) {
        self.failure_count = self.failure_count.saturating_add(1);
        if later.last_failure > self.last_failure {
            self.last_failure = later.last_failure;
        }
        self.failure_reason = later.failure_reason;
        self.classification = later.classification;
        self.metadata.extend(later.metadata);
    }
}
