//! Failure classification.
//!
//! Rules are checked in a fixed order and the first match wins:
//! timeout, validation, security, temporary. Anything unmatched is
//! classified as [`ErrorClassification::Permanent`] so that unknown
//! failures are never retried indefinitely.

use crate::entry::ErrorClassification;

const TIMEOUT_PATTERNS: &[&str] = &["timeout", "timed out", "deadline"];

const VALIDATION_PATTERNS: &[&str] = &[
    "validation",
    "invalid",
    "malformed",
    "schema",
    "parse",
    "missing field",
];

const SECURITY_PATTERNS: &[&str] = &[
    "unauthorized",
    "unauthenticated",
    "forbidden",
    "permission",
    "access denied",
    "authentication",
    "credential",
];

const TEMPORARY_PATTERNS: &[&str] = &[
    "connection",
    "network",
    "unavailable",
    "temporar",
    "refused",
    "reset",
    "try again",
    "throttl",
    "rate limit",
    "busy",
];

/// Maps failure descriptions to an [`ErrorClassification`].
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<(ErrorClassification, Vec<String>)>,
}

impl ErrorClassifier {
    /// Creates a classifier with the default rule set.
    pub fn new() -> Self {
        let rule = |class, patterns: &[&str]| {
            (class, patterns.iter().map(|p| p.to_string()).collect())
        };

        Self {
            rules: vec![
                rule(ErrorClassification::Timeout, TIMEOUT_PATTERNS),
                rule(ErrorClassification::Validation, VALIDATION_PATTERNS),
                rule(ErrorClassification::Security, SECURITY_PATTERNS),
                rule(ErrorClassification::Temporary, TEMPORARY_PATTERNS),
            ],
        }
    }

    /// Adds a pattern to an existing class without changing rule order.
    ///
    /// Patterns for [`ErrorClassification::Permanent`] are ignored since it is
    /// the fallback.
    pub fn with_pattern(mut self, class: ErrorClassification, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into().to_lowercase();
        if let Some((_, patterns)) = self.rules.iter_mut().find(|(c, _)| *c == class) {
            patterns.push(pattern);
        }
        self
    }

    /// Classifies a textual failure description.
    pub fn classify(&self, failure: &str) -> ErrorClassification {
        let text = failure.to_lowercase();

        self.rules
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| text.contains(p.as_str())))
            .map(|(class, _)| *class)
            .unwrap_or(ErrorClassification::Permanent)
    }

    /// Classifies an error value, including its whole source chain.
    pub fn classify_error(&self, error: &(dyn std::error::Error + 'static)) -> ErrorClassification {
        self.classify(&describe_error(error))
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Flattens an error and its sources into one `a: b: c` string.
pub fn describe_error(error: &(dyn std::error::Error + 'static)) -> String {
    let mut description = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        description.push_str(": ");
        description.push_str(&cause.to_string());
        source = cause.source();
    }
    description
}
