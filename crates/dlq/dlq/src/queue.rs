use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::analytics::{AnalyticsAggregator, DlqAnalytics};
use crate::classifier::{describe_error, ErrorClassifier};
use crate::entry::{DlqEntry, ErrorClassification, Message};
use crate::error::{DlqError, DlqResult};
use crate::store::DlqStorage;
use crate::strategy::ReprocessingStrategy;

/// Query parameters for listing dead letters.
#[derive(Debug, Clone, Default)]
pub struct DlqQuery {
    /// Filter by topic.
    pub topic: Option<String>,

    /// Filter by classification.
    pub classification: Option<ErrorClassification>,

    /// Filter by minimum failure count.
    pub min_failure_count: Option<u32>,

    /// Maximum number of results.
    pub limit: Option<usize>,

    /// Offset for pagination.
    pub offset: Option<usize>,
}

impl DlqQuery {
    /// Checks whether an entry passes the filters (pagination aside).
    pub fn matches(&self, entry: &DlqEntry) -> bool {
        if let Some(ref topic) = self.topic {
            if entry.topic() != topic {
                return false;
            }
        }

        if let Some(class) = self.classification {
            if entry.classification != class {
                return false;
            }
        }

        if let Some(min) = self.min_failure_count {
            if entry.failure_count < min {
                return false;
            }
        }

        true
    }
}

/// Dead letter queue: the entry point for capturing and managing failed messages.
pub struct DeadLetterQueue {
    storage: Arc<dyn DlqStorage>,
    classifier: ErrorClassifier,
    strategy: Arc<dyn ReprocessingStrategy>,
}

impl DeadLetterQueue {
    /// Create a new dead letter queue with the default classifier
    pub fn new(storage: Arc<dyn DlqStorage>, strategy: Arc<dyn ReprocessingStrategy>) -> Self {
        Self {
            storage,
            classifier: ErrorClassifier::default(),
            strategy,
        }
    }

    /// Replace the classifier
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Classify a failure and store it, merging with any live entry for the message
    pub async fn capture(&self, message: Message, failure: impl Into<String>) -> DlqResult<DlqEntry> {
        let failure = failure.into();
        let classification = self.classifier.classify(&failure);
        self.send(DlqEntry::new(message, failure, classification)).await
    }

    /// Like [`capture`](Self::capture), describing the failure by its error chain
    pub async fn capture_error(
        &self,
        message: Message,
        error: &(dyn std::error::Error + 'static),
    ) -> DlqResult<DlqEntry> {
        self.capture(message, describe_error(error)).await
    }

    /// Send an already classified entry to the dead letter queue
    pub async fn send(&self, entry: DlqEntry) -> DlqResult<DlqEntry> {
        let stored = self.storage.send(entry).await?;

        if !stored.classification.is_retryable()
            || stored.failure_count >= self.strategy.max_attempts()
        {
            tracing::error!(
                "Message {} will not be retried ({}, {} failures): {}",
                stored.id(),
                stored.classification,
                stored.failure_count,
                stored.failure_reason
            );
        } else {
            tracing::warn!(
                "Message {} sent to DLQ after {} failures ({}): {}",
                stored.id(),
                stored.failure_count,
                stored.classification,
                stored.failure_reason
            );
        }

        Ok(stored)
    }

    /// Get a dead letter by message ID
    pub async fn get(&self, id: &str) -> DlqResult<Option<DlqEntry>> {
        self.storage.get(id).await
    }

    /// Remove a dead letter by message ID
    pub async fn remove(&self, id: &str) -> DlqResult<()> {
        self.storage.remove(id).await
    }

    /// List dead letters matching query, oldest first
    pub async fn list(&self, query: DlqQuery) -> DlqResult<Vec<DlqEntry>> {
        let mut entries: Vec<DlqEntry> = self
            .storage
            .snapshot()
            .await?
            .into_iter()
            .filter(|e| query.matches(e))
            .collect();

        entries.sort_by(|a, b| {
            a.first_failure
                .cmp(&b.first_failure)
                .then_with(|| a.id().cmp(b.id()))
        });

        // Apply pagination
        if let Some(offset) = query.offset {
            entries = entries.into_iter().skip(offset).collect();
        }
        if let Some(limit) = query.limit {
            entries.truncate(limit);
        }

        Ok(entries)
    }

    /// Entries the strategy currently permits retrying, oldest first
    pub async fn eligible(&self) -> DlqResult<Vec<DlqEntry>> {
        let strategy = Arc::clone(&self.strategy);
        self.storage
            .list_eligible(&move |e: &DlqEntry| strategy.should_reprocess(e))
            .await
    }

    /// Get statistics about the DLQ
    pub async fn analytics(&self) -> DlqResult<DlqAnalytics> {
        AnalyticsAggregator::new(Arc::clone(&self.storage))
            .get_analytics()
            .await
    }

    /// Purge dead letters that first failed before `cutoff`
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DlqResult<usize> {
        let all_entries = self.storage.snapshot().await?;
        let mut purged = 0;

        for entry in all_entries {
            if entry.first_failure >= cutoff {
                continue;
            }
            match self.storage.remove(entry.id()).await {
                Ok(()) => purged += 1,
                // Removed concurrently, e.g. by a successful republish.
                Err(DlqError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        tracing::info!("Purged {} old dead letters", purged);
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ClaimToken, ClaimedBatch, EntryPredicate, InMemoryDlqStorage};
    use crate::strategy::ExponentialBackoff;
    use async_trait::async_trait;
    use chrono::Duration;

    /// Store whose `remove` fails for one message ID.
    struct BrokenRemoveStorage {
        inner: Arc<InMemoryDlqStorage>,
        broken_id: &'static str,
    }

    #[async_trait]
    impl DlqStorage for BrokenRemoveStorage {
        async fn send(&self, entry: DlqEntry) -> DlqResult<DlqEntry> {
            self.inner.send(entry).await
        }

        async fn get(&self, id: &str) -> DlqResult<Option<DlqEntry>> {
            self.inner.get(id).await
        }

        async fn remove(&self, id: &str) -> DlqResult<()> {
            if id == self.broken_id {
                return Err(DlqError::Internal("disk full".into()));
            }
            self.inner.remove(id).await
        }

        async fn list_eligible(&self, predicate: EntryPredicate<'_>) -> DlqResult<Vec<DlqEntry>> {
            self.inner.list_eligible(predicate).await
        }

        async fn snapshot(&self) -> DlqResult<Vec<DlqEntry>> {
            self.inner.snapshot().await
        }

        async fn claim(&self, predicate: EntryPredicate<'_>, limit: usize) -> DlqResult<ClaimedBatch> {
            self.inner.claim(predicate, limit).await
        }

        async fn claim_one(&self, id: &str) -> DlqResult<ClaimedBatch> {
            self.inner.claim_one(id).await
        }

        async fn finalize(&self, id: &str, token: ClaimToken) -> DlqResult<bool> {
            self.inner.finalize(id, token).await
        }

        async fn release(&self, id: &str, token: ClaimToken) -> DlqResult<()> {
            self.inner.release(id, token).await
        }

        async fn len(&self) -> DlqResult<usize> {
            self.inner.len().await
        }
    }

    fn create_dlq() -> DeadLetterQueue {
        DeadLetterQueue::new(
            InMemoryDlqStorage::shared(),
            Arc::new(ExponentialBackoff::new().max_attempts(3)),
        )
    }

    fn message(id: &str, topic: &str) -> Message {
        Message::new(id, topic, b"{\"amount\": 10}".to_vec())
    }

    #[tokio::test]
    async fn test_capture_classifies() {
        let dlq = create_dlq();

        let entry = dlq
            .capture(
                message("m-1", "orders").with_header("trace-id", "abc123"),
                "upstream connection refused",
            )
            .await
            .unwrap();
        assert_eq!(entry.classification, ErrorClassification::Temporary);

        let stored = dlq.get("m-1").await.unwrap().unwrap();
        assert_eq!(stored.failure_count, 1);
        assert_eq!(stored.failure_reason, "upstream connection refused");
        assert_eq!(
            stored.message.headers.get("trace-id").map(String::as_str),
            Some("abc123")
        );
    }

    #[tokio::test]
    async fn test_capture_merges_and_reclassifies() {
        let dlq = create_dlq();

        dlq.capture(message("m-1", "orders"), "connection reset")
            .await
            .unwrap();
        let merged = dlq
            .capture(message("m-1", "orders"), "403 forbidden")
            .await
            .unwrap();

        assert_eq!(merged.failure_count, 2);
        assert_eq!(merged.classification, ErrorClassification::Security);
    }

    #[tokio::test]
    async fn test_capture_error_uses_chain() {
        let dlq = create_dlq();
        let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out");

        let entry = dlq.capture_error(message("m-1", "orders"), &err).await.unwrap();
        assert_eq!(entry.classification, ErrorClassification::Timeout);
    }

    #[tokio::test]
    async fn test_list_with_query() {
        let dlq = create_dlq();
        dlq.capture(message("m-1", "orders"), "connection reset").await.unwrap();
        dlq.capture(message("m-2", "payments"), "connection reset").await.unwrap();
        dlq.capture(message("m-3", "orders"), "boom").await.unwrap();
        dlq.capture(message("m-3", "orders"), "boom").await.unwrap();

        let orders = dlq
            .list(DlqQuery {
                topic: Some("orders".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(orders.len(), 2);

        let repeated = dlq
            .list(DlqQuery {
                min_failure_count: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(repeated.len(), 1);
        assert_eq!(repeated[0].id(), "m-3");

        let permanent = dlq
            .list(DlqQuery {
                classification: Some(ErrorClassification::Permanent),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(permanent.len(), 1);

        let page = dlq
            .list(DlqQuery {
                offset: Some(1),
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_eligible_excludes_terminal_classes() {
        let dlq = create_dlq();
        dlq.capture(message("m-1", "orders"), "connection reset").await.unwrap();
        dlq.capture(message("m-2", "orders"), "permission denied").await.unwrap();
        dlq.capture(message("m-3", "orders"), "boom").await.unwrap();

        let eligible = dlq.eligible().await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id(), "m-1");
    }

    #[tokio::test]
    async fn test_purge_older_than() {
        let dlq = create_dlq();
        let old = Utc::now() - Duration::days(8);

        dlq.send(
            DlqEntry::new(message("old", "orders"), "boom", ErrorClassification::Permanent)
                .failed_at(old),
        )
        .await
        .unwrap();
        dlq.capture(message("new", "orders"), "boom").await.unwrap();

        let purged = dlq
            .purge_older_than(Utc::now() - Duration::days(7))
            .await
            .unwrap();

        assert_eq!(purged, 1);
        assert!(dlq.get("old").await.unwrap().is_none());
        assert!(dlq.get("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_propagates_store_errors() {
        let inner = InMemoryDlqStorage::shared();
        let dlq = DeadLetterQueue::new(
            Arc::new(BrokenRemoveStorage {
                inner: inner.clone(),
                broken_id: "stuck",
            }),
            Arc::new(ExponentialBackoff::new()),
        );
        let old = Utc::now() - Duration::days(8);

        dlq.send(
            DlqEntry::new(message("stuck", "orders"), "boom", ErrorClassification::Permanent)
                .failed_at(old),
        )
        .await
        .unwrap();

        let err = dlq
            .purge_older_than(Utc::now() - Duration::days(7))
            .await
            .unwrap_err();
        assert!(matches!(err, DlqError::Internal(_)));
        assert!(inner.get("stuck").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_custom_classifier_patterns() {
        let dlq = create_dlq().with_classifier(
            ErrorClassifier::new().with_pattern(ErrorClassification::Temporary, "leader not available"),
        );

        let entry = dlq
            .capture(message("m-1", "orders"), "LEADER NOT AVAILABLE for partition 3")
            .await
            .unwrap();
        assert_eq!(entry.classification, ErrorClassification::Temporary);
        assert_eq!(dlq.eligible().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dlq_analytics() {
        let dlq = create_dlq();
        dlq.capture(message("m-1", "orders"), "timeout").await.unwrap();
        dlq.capture(message("m-2", "orders"), "timeout").await.unwrap();

        let analytics = dlq.analytics().await.unwrap();
        assert_eq!(analytics.total_count, 2);
        assert_eq!(analytics.count_for(ErrorClassification::Timeout), 2);
        assert!(analytics.average_failure_count > 0.0);
    }
}
