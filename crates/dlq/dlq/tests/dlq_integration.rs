//! End-to-end tests across the DLQ components.

use async_trait::async_trait;
use relay_dlq::{
    Alerting, AnalyticsAggregator, BatchReprocessor, Cancellation, DeadLetterQueue, DlqEntry,
    DlqError, DlqResult, DlqStorage, ErrorClassification, ExponentialBackoff, HIGH_VOLUME_ALERT,
    InMemoryDlqStorage, Message, Monitor, MonitorConfig, Publisher, ReprocessFilter,
    ReprocessorConfig,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Publisher that tracks in-flight ids and flags any duplicate dispatch.
#[derive(Default)]
struct TrackingPublisher {
    in_flight: Mutex<HashSet<String>>,
    published: Mutex<HashMap<String, usize>>,
    duplicates: AtomicUsize,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
    delay: Duration,
}

impl TrackingPublisher {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn publish_counts(&self) -> HashMap<String, usize> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for TrackingPublisher {
    async fn publish(&self, _topic: &str, message: &Message) -> DlqResult<()> {
        if !self.in_flight.lock().unwrap().insert(message.id.clone()) {
            self.duplicates.fetch_add(1, Ordering::SeqCst);
        }
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        self.in_flight.lock().unwrap().remove(&message.id);
        *self
            .published
            .lock()
            .unwrap()
            .entry(message.id.clone())
            .or_insert(0) += 1;
        Ok(())
    }
}

#[derive(Default)]
struct CollectingAlerting {
    warnings: Mutex<Vec<String>>,
}

#[async_trait]
impl Alerting for CollectingAlerting {
    async fn send_warning(&self, kind: &str, _text: &str) -> DlqResult<()> {
        self.warnings.lock().unwrap().push(kind.to_string());
        Ok(())
    }

    async fn send_critical(&self, _kind: &str, _text: &str) -> DlqResult<()> {
        Ok(())
    }

    async fn send_security(&self, _kind: &str, _text: &str) -> DlqResult<()> {
        Ok(())
    }
}

fn strategy() -> Arc<ExponentialBackoff> {
    Arc::new(
        ExponentialBackoff::new()
            .base_delay(Duration::from_millis(10))
            .multiplier(2.0)
            .max_delay(Duration::from_millis(100))
            .max_attempts(3),
    )
}

fn message(id: &str) -> Message {
    Message::new(id, "orders", b"{\"order\": 1}".to_vec())
}

#[tokio::test]
async fn test_capture_reprocess_flow() {
    let storage = InMemoryDlqStorage::shared();
    let strategy = strategy();
    let dlq = DeadLetterQueue::new(storage.clone(), strategy.clone());

    dlq.capture(message("m-1"), "connection refused").await.unwrap();
    dlq.capture(message("m-2"), "request timed out").await.unwrap();
    dlq.capture(message("m-3"), "permission denied").await.unwrap();
    dlq.capture(message("m-4"), "something odd happened").await.unwrap();

    let publisher = Arc::new(TrackingPublisher::default());
    let reprocessor = BatchReprocessor::new(storage.clone(), publisher.clone(), strategy);

    let report = reprocessor
        .reprocess_batch(&Cancellation::never(), &ReprocessFilter::all())
        .await
        .unwrap();
    assert_eq!(report.published, 2);

    let remaining: HashSet<String> = dlq
        .list(Default::default())
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.message.id)
        .collect();
    assert_eq!(
        remaining,
        HashSet::from(["m-3".to_string(), "m-4".to_string()])
    );

    let analytics = dlq.analytics().await.unwrap();
    assert_eq!(analytics.total_count, 2);
    assert_eq!(analytics.count_for(ErrorClassification::Security), 1);
    assert_eq!(analytics.count_for(ErrorClassification::Permanent), 1);
}

#[tokio::test]
async fn test_repeated_failures_exhaust_retries() {
    let storage = InMemoryDlqStorage::shared();
    let dlq = DeadLetterQueue::new(storage.clone(), strategy());

    for _ in 0..3 {
        dlq.capture(message("m-1"), "service unavailable").await.unwrap();
    }

    let entry = dlq.get("m-1").await.unwrap().unwrap();
    assert_eq!(entry.failure_count, 3);
    assert!(dlq.eligible().await.unwrap().is_empty());

    let reprocessor = BatchReprocessor::new(
        storage.clone(),
        Arc::new(TrackingPublisher::default()),
        strategy(),
    );
    assert!(matches!(
        reprocessor.reprocess_one("m-1").await,
        Err(DlqError::NotEligible(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_batches_never_double_dispatch() {
    let storage = InMemoryDlqStorage::shared();
    for i in 0..40 {
        storage
            .send(DlqEntry::new(
                message(&format!("m-{i}")),
                "connection reset",
                ErrorClassification::Temporary,
            ))
            .await
            .unwrap();
    }

    let publisher = Arc::new(TrackingPublisher::with_delay(Duration::from_millis(5)));
    let reprocessor = Arc::new(BatchReprocessor::with_config(
        storage.clone(),
        publisher.clone(),
        strategy(),
        ReprocessorConfig::new(15, 4),
    ));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let reprocessor = reprocessor.clone();
        handles.push(tokio::spawn(async move {
            reprocessor
                .reprocess_batch(&Cancellation::never(), &ReprocessFilter::all())
                .await
        }));
    }

    let mut claimed = 0;
    for handle in handles {
        claimed += handle.await.unwrap().unwrap().claimed;
    }

    assert_eq!(publisher.duplicates.load(Ordering::SeqCst), 0);
    let counts = publisher.publish_counts();
    assert_eq!(claimed, counts.len());
    assert!(counts.values().all(|&n| n == 1));
    assert_eq!(storage.len().await.unwrap(), 40 - counts.len());
    assert_eq!(storage.in_flight().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_width_is_respected() {
    let storage = InMemoryDlqStorage::shared();
    for i in 0..20 {
        storage
            .send(DlqEntry::new(
                message(&format!("m-{i}")),
                "connection reset",
                ErrorClassification::Temporary,
            ))
            .await
            .unwrap();
    }

    let publisher = Arc::new(TrackingPublisher::with_delay(Duration::from_millis(10)));
    let reprocessor = BatchReprocessor::with_config(
        storage.clone(),
        publisher.clone(),
        strategy(),
        ReprocessorConfig::new(20, 3),
    );

    let report = reprocessor
        .reprocess_batch(&Cancellation::never(), &ReprocessFilter::all())
        .await
        .unwrap();

    assert_eq!(report.published, 20);
    assert!(publisher.max_concurrent.load(Ordering::SeqCst) <= 3);
    assert!(storage.is_empty().await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sends_for_one_message() {
    let storage = InMemoryDlqStorage::shared();
    let dlq = Arc::new(DeadLetterQueue::new(storage.clone(), strategy()));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let dlq = dlq.clone();
        handles.push(tokio::spawn(async move {
            dlq.capture(message("m-1"), "connection reset").await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let entry = dlq.get("m-1").await.unwrap().unwrap();
    assert_eq!(entry.failure_count, 16);
    assert_eq!(storage.len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_failure_while_in_flight_is_kept() {
    let storage = InMemoryDlqStorage::shared();
    let dlq = DeadLetterQueue::new(storage.clone(), strategy());
    dlq.capture(message("m-1"), "connection reset").await.unwrap();

    let claimed = storage.claim(&|_: &DlqEntry| true, 10).await.unwrap();
    assert_eq!(claimed.len(), 1);

    // the message fails again elsewhere while a batch holds it
    dlq.capture(message("m-1"), "connection reset").await.unwrap();

    assert!(!storage.finalize("m-1", claimed.token).await.unwrap());
    let entry = dlq.get("m-1").await.unwrap().unwrap();
    assert_eq!(entry.failure_count, 2);
    assert_eq!(storage.in_flight().await, 0);
}

#[tokio::test]
async fn test_monitor_sees_reprocessing_results() {
    let storage = InMemoryDlqStorage::shared();
    let strategy = strategy();
    let dlq = DeadLetterQueue::new(storage.clone(), strategy.clone());
    for i in 0..5 {
        dlq.capture(message(&format!("m-{i}")), "connection reset")
            .await
            .unwrap();
    }

    let alerting = Arc::new(CollectingAlerting::default());
    let monitor = Monitor::new(
        AnalyticsAggregator::new(storage.clone()),
        alerting.clone(),
        MonitorConfig::default().max_messages(3),
    );

    monitor.check().await.unwrap();
    assert_eq!(
        alerting.warnings.lock().unwrap().clone(),
        vec![HIGH_VOLUME_ALERT.to_string()]
    );

    BatchReprocessor::new(storage, Arc::new(TrackingPublisher::default()), strategy)
        .reprocess_batch(&Cancellation::never(), &ReprocessFilter::all())
        .await
        .unwrap();

    assert!(monitor.check().await.unwrap().is_empty());
    assert_eq!(alerting.warnings.lock().unwrap().len(), 1);
}
