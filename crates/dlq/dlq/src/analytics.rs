//! Point-in-time statistics over the DLQ contents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::entry::{DlqEntry, ErrorClassification};
use crate::error::DlqResult;
use crate::store::DlqStorage;

/// Statistics about the dead letter queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DlqAnalytics {
    /// Total number of entries.
    pub total_count: usize,

    /// Entries per classification. Classes with no entries are absent.
    pub by_classification: BTreeMap<ErrorClassification, usize>,

    /// Entries per topic.
    pub by_topic: BTreeMap<String, usize>,

    /// Mean failure count across entries, 0.0 when empty.
    pub average_failure_count: f64,

    /// Earliest `first_failure` across entries.
    pub oldest_first_failure: Option<DateTime<Utc>>,
}

impl DlqAnalytics {
    /// Aggregates a set of entries in one pass.
    pub fn from_entries(entries: &[DlqEntry]) -> Self {
        let mut analytics = DlqAnalytics {
            total_count: entries.len(),
            ..Default::default()
        };
        let mut failure_sum: u64 = 0;

        for entry in entries {
            *analytics
                .by_classification
                .entry(entry.classification)
                .or_insert(0) += 1;
            *analytics
                .by_topic
                .entry(entry.message.topic.clone())
                .or_insert(0) += 1;
            failure_sum += u64::from(entry.failure_count);

            analytics.oldest_first_failure = Some(match analytics.oldest_first_failure {
                Some(oldest) if oldest <= entry.first_failure => oldest,
                _ => entry.first_failure,
            });
        }

        if !entries.is_empty() {
            analytics.average_failure_count = failure_sum as f64 / entries.len() as f64;
        }

        analytics
    }

    /// Number of entries with the given classification.
    pub fn count_for(&self, class: ErrorClassification) -> usize {
        self.by_classification.get(&class).copied().unwrap_or(0)
    }

    /// Age of the oldest entry at `now`, if any.
    pub fn oldest_age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.oldest_first_failure.map(|oldest| now - oldest)
    }
}

/// Computes [`DlqAnalytics`] from a store.
///
/// Nothing is cached: every call reads one fresh snapshot, so the numbers can
/// never drift from the store's actual contents.
#[derive(Clone)]
pub struct AnalyticsAggregator {
    storage: Arc<dyn DlqStorage>,
}

impl AnalyticsAggregator {
    /// Creates an aggregator over a store.
    pub fn new(storage: Arc<dyn DlqStorage>) -> Self {
        Self { storage }
    }

    /// Computes statistics from a single store snapshot.
    pub async fn get_analytics(&self) -> DlqResult<DlqAnalytics> {
        let entries = self.storage.snapshot().await?;
        Ok(DlqAnalytics::from_entries(&entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDlqStorage;
    use crate::Message;
    use chrono::Duration;

    fn entry(id: &str, topic: &str, class: ErrorClassification, count: u32) -> DlqEntry {
        DlqEntry::new(Message::new(id, topic, Vec::new()), "failure", class)
            .with_failure_count(count)
    }

    #[tokio::test]
    async fn test_average_failure_count() {
        let storage = InMemoryDlqStorage::shared();
        for (i, count) in [1, 2, 1, 3].into_iter().enumerate() {
            storage
                .send(entry(&format!("m-{i}"), "orders", ErrorClassification::Temporary, count))
                .await
                .unwrap();
        }

        let analytics = AnalyticsAggregator::new(storage).get_analytics().await.unwrap();
        assert_eq!(analytics.total_count, 4);
        assert_eq!(analytics.average_failure_count, 1.75);
    }

    #[tokio::test]
    async fn test_empty_store() {
        let aggregator = AnalyticsAggregator::new(InMemoryDlqStorage::shared());
        let analytics = aggregator.get_analytics().await.unwrap();

        assert_eq!(analytics.total_count, 0);
        assert_eq!(analytics.average_failure_count, 0.0);
        assert!(analytics.oldest_first_failure.is_none());
        assert!(analytics.by_classification.is_empty());
    }

    #[tokio::test]
    async fn test_breakdowns_and_oldest() {
        let storage = InMemoryDlqStorage::shared();
        let oldest = Utc::now() - Duration::hours(3);

        storage
            .send(entry("a", "orders", ErrorClassification::Security, 1).failed_at(oldest))
            .await
            .unwrap();
        storage
            .send(entry("b", "orders", ErrorClassification::Temporary, 1))
            .await
            .unwrap();
        storage
            .send(
                entry("c", "payments", ErrorClassification::Security, 1)
                    .failed_at(oldest + Duration::hours(1)),
            )
            .await
            .unwrap();

        let analytics = AnalyticsAggregator::new(storage).get_analytics().await.unwrap();

        assert_eq!(analytics.count_for(ErrorClassification::Security), 2);
        assert_eq!(analytics.count_for(ErrorClassification::Temporary), 1);
        assert_eq!(analytics.count_for(ErrorClassification::Permanent), 0);
        assert_eq!(analytics.by_topic.get("orders"), Some(&2));
        assert_eq!(analytics.by_topic.get("payments"), Some(&1));
        assert_eq!(analytics.oldest_first_failure, Some(oldest));

        let per_class: usize = ErrorClassification::ALL
            .iter()
            .map(|class| analytics.count_for(*class))
            .sum();
        assert_eq!(per_class, analytics.total_count);
    }

    #[tokio::test]
    async fn test_repeated_calls_are_identical() {
        let storage = InMemoryDlqStorage::shared();
        for i in 0..10 {
            storage
                .send(entry(&format!("m-{i}"), "orders", ErrorClassification::Timeout, 2))
                .await
                .unwrap();
        }

        let aggregator = AnalyticsAggregator::new(storage);
        let first = aggregator.get_analytics().await.unwrap();
        let second = aggregator.get_analytics().await.unwrap();
        assert_eq!(first, second);
    }
}
