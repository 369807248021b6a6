//! Bounded-concurrency batch reprocessing.
//!
//! Every batch follows claim → dispatch → settle:
//! - entries are claimed in the store, so overlapping batches never select the
//!   same entry;
//! - each claimed entry is republished by a worker holding one of
//!   `concurrency_width` permits;
//! - a successful publish finalizes (drops) the entry, a failed one releases it
//!   unchanged for a later batch.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::cancel::Cancellation;
use crate::collaborators::Publisher;
use crate::config::ReprocessorConfig;
use crate::entry::{DlqEntry, ErrorClassification};
use crate::error::{DlqError, DlqResult, PublishFailure};
use crate::store::{ClaimToken, DlqStorage};
use crate::strategy::ReprocessingStrategy;

/// Caller-supplied selection applied on top of the strategy's eligibility check.
#[derive(Clone)]
pub struct ReprocessFilter {
    predicate: Arc<dyn Fn(&DlqEntry) -> bool + Send + Sync>,
}

impl ReprocessFilter {
    /// Creates a filter from a predicate.
    pub fn new(predicate: impl Fn(&DlqEntry) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Accepts every entry.
    pub fn all() -> Self {
        Self::new(|_| true)
    }

    /// Accepts entries from one topic.
    pub fn topic(topic: impl Into<String>) -> Self {
        let topic = topic.into();
        Self::new(move |entry| entry.topic() == topic)
    }

    /// Accepts entries with one classification.
    pub fn classification(class: ErrorClassification) -> Self {
        Self::new(move |entry| entry.classification == class)
    }

    /// Accepts entries whose backoff has elapsed as of now.
    pub fn due(strategy: Arc<dyn ReprocessingStrategy>) -> Self {
        let now = Utc::now();
        Self::new(move |entry| strategy.next_attempt_time(entry) <= now)
    }

    /// Accepts entries matching both filters.
    pub fn and(self, other: ReprocessFilter) -> Self {
        Self::new(move |entry| self.matches(entry) && other.matches(entry))
    }

    /// Checks an entry against the filter.
    pub fn matches(&self, entry: &DlqEntry) -> bool {
        (self.predicate)(entry)
    }
}

impl Default for ReprocessFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl std::fmt::Debug for ReprocessFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReprocessFilter").finish_non_exhaustive()
    }
}

/// Outcome of a batch that had no publish failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Entries claimed from the store.
    pub claimed: usize,
    /// Entries handed to a worker.
    pub dispatched: usize,
    /// Entries republished and dropped from the store.
    pub published: usize,
    /// Entries republished but kept because they failed again while in flight.
    pub kept: usize,
    /// Claimed entries released without dispatch because of cancellation.
    pub released: usize,
    /// Whether cancellation cut the batch short.
    pub cancelled: bool,
}

/// Number of times a claim release is attempted before the entry is reported
/// as stranded.
const RELEASE_ATTEMPTS: usize = 3;

/// Result of a single worker.
struct Settled {
    message_id: String,
    outcome: Outcome,
    /// False when the claim could be neither finalized nor released.
    claim_settled: bool,
}

enum Outcome {
    Published { removed: bool },
    Failed(PublishFailure),
}

/// Republishes eligible entries in bounded-concurrency batches.
pub struct BatchReprocessor {
    storage: Arc<dyn DlqStorage>,
    publisher: Arc<dyn Publisher>,
    strategy: Arc<dyn ReprocessingStrategy>,
    config: ReprocessorConfig,
}

impl BatchReprocessor {
    /// Creates a reprocessor with default configuration.
    pub fn new(
        storage: Arc<dyn DlqStorage>,
        publisher: Arc<dyn Publisher>,
        strategy: Arc<dyn ReprocessingStrategy>,
    ) -> Self {
        Self::with_config(storage, publisher, strategy, ReprocessorConfig::default())
    }

    /// Creates a reprocessor with custom configuration.
    pub fn with_config(
        storage: Arc<dyn DlqStorage>,
        publisher: Arc<dyn Publisher>,
        strategy: Arc<dyn ReprocessingStrategy>,
        config: ReprocessorConfig,
    ) -> Self {
        Self {
            storage,
            publisher,
            strategy,
            config,
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &ReprocessorConfig {
        &self.config
    }

    /// Gets the reprocessing strategy.
    pub fn strategy(&self) -> &Arc<dyn ReprocessingStrategy> {
        &self.strategy
    }

    /// Claims and republishes up to `batch_size` eligible entries.
    ///
    /// Entries must satisfy both the strategy's `should_reprocess` and
    /// `filter`. Publish failures leave their entries in the store unchanged
    /// and are returned together as `DlqError::BatchFailed`.
    ///
    /// Once `cancel` fires no further entries are dispatched; claimed but
    /// undispatched entries are released, and publishes already running are
    /// allowed to settle.
    pub async fn reprocess_batch(
        &self,
        cancel: &Cancellation,
        filter: &ReprocessFilter,
    ) -> DlqResult<BatchReport> {
        if cancel.is_cancelled() {
            return Err(DlqError::Cancelled);
        }

        let start = Instant::now();
        let strategy = Arc::clone(&self.strategy);
        let eligible = move |entry: &DlqEntry| strategy.should_reprocess(entry) && filter.matches(entry);

        let batch = self.storage.claim(&eligible, self.config.batch_size).await?;
        let mut report = BatchReport {
            claimed: batch.len(),
            ..Default::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        let token = batch.token;
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency_width.max(1)));
        let mut workers: JoinSet<Settled> = JoinSet::new();
        let mut dispatched: Vec<(String, String)> = Vec::with_capacity(batch.len());
        let mut undispatched: Vec<DlqEntry> = Vec::new();

        let mut entries = batch.entries.into_iter();
        while let Some(entry) = entries.next() {
            // Blocks here while the pool is saturated.
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                undispatched.push(entry);
                undispatched.extend(entries.by_ref());
                report.cancelled = true;
                break;
            };

            tracing::debug!(
                "Dispatching DLQ entry {} to topic {} (failures: {})",
                entry.id(),
                entry.topic(),
                entry.failure_count
            );
            dispatched.push((entry.message.id.clone(), entry.message.topic.clone()));

            let storage = Arc::clone(&self.storage);
            let publisher = Arc::clone(&self.publisher);
            workers.spawn(async move {
                let _permit = permit;
                republish(storage, publisher, entry, token).await
            });
        }
        report.dispatched = dispatched.len();

        // Settling never short-circuits: every claim gets its release attempt
        // and every worker runs to completion.
        let mut stranded = Vec::new();
        for entry in &undispatched {
            if release_claim(self.storage.as_ref(), entry.id(), token).await.is_err() {
                stranded.push(entry.id().to_string());
            }
        }
        report.released = undispatched.len() - stranded.len();

        let mut failures = Vec::new();
        let mut settled_ids = HashSet::new();
        while let Some(joined) = workers.join_next().await {
            let settled = match joined {
                Ok(settled) => settled,
                Err(e) => {
                    tracing::error!("DLQ reprocess worker panicked: {}", e);
                    continue;
                }
            };

            if !settled.claim_settled {
                stranded.push(settled.message_id.clone());
            }
            match settled.outcome {
                Outcome::Published { removed: true } => report.published += 1,
                Outcome::Published { removed: false } => report.kept += 1,
                Outcome::Failed(failure) => failures.push(failure),
            }
            settled_ids.insert(settled.message_id);
        }

        // A panicked worker never settled its entry.
        for (message_id, topic) in dispatched {
            if settled_ids.contains(&message_id) {
                continue;
            }
            if release_claim(self.storage.as_ref(), &message_id, token).await.is_err() {
                stranded.push(message_id.clone());
            }
            failures.push(PublishFailure {
                message_id,
                topic,
                error: "reprocess worker panicked".to_string(),
            });
        }

        tracing::info!(
            "DLQ batch finished in {:?}: {} claimed, {} published, {} kept, {} failed, {} released, {} stranded",
            start.elapsed(),
            report.claimed,
            report.published,
            report.kept,
            failures.len(),
            report.released,
            stranded.len()
        );

        if !stranded.is_empty() {
            return Err(DlqError::Internal(format!(
                "{} claimed entries could not be released: {}",
                stranded.len(),
                stranded.join(", ")
            )));
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(DlqError::BatchFailed {
                attempted: report.dispatched,
                failures,
            })
        }
    }

    /// Republishes a single entry by message ID.
    ///
    /// Fails with `DlqError::NotEligible` if the strategy forbids a retry and
    /// with `DlqError::InFlight` if a batch currently holds the entry.
    pub async fn reprocess_one(&self, id: &str) -> DlqResult<()> {
        let batch = self.storage.claim_one(id).await?;
        let token = batch.token;
        let Some(entry) = batch.entries.into_iter().next() else {
            return Err(DlqError::NotFound(id.to_string()));
        };

        if !self.strategy.should_reprocess(&entry) {
            release_claim(self.storage.as_ref(), id, token).await?;
            return Err(DlqError::NotEligible(format!(
                "{} ({}, {} failures)",
                id, entry.classification, entry.failure_count
            )));
        }

        let settled = republish(
            Arc::clone(&self.storage),
            Arc::clone(&self.publisher),
            entry,
            token,
        )
        .await;

        if !settled.claim_settled {
            return Err(DlqError::Internal(format!(
                "claim on {} could not be released",
                id
            )));
        }
        match settled.outcome {
            Outcome::Published { .. } => {
                tracing::info!("Successfully retried DLQ entry {}", id);
                Ok(())
            }
            Outcome::Failed(failure) => Err(DlqError::Publish(failure.error)),
        }
    }

    /// Runs batches on the configured interval until `cancel` fires.
    ///
    /// Only entries whose backoff has elapsed are selected. Batch failures are
    /// logged; the loop keeps going.
    pub async fn run(&self, cancel: Cancellation) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "DLQ reprocessor started (batch size {}, width {}, interval {:?})",
            self.config.batch_size,
            self.config.concurrency_width,
            self.config.interval()
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let filter = ReprocessFilter::due(Arc::clone(&self.strategy));
            match self.reprocess_batch(&cancel, &filter).await {
                Ok(_) => {}
                Err(DlqError::Cancelled) => break,
                Err(e) => tracing::warn!("DLQ reprocess batch failed: {}", e),
            }
        }

        tracing::info!("DLQ reprocessor stopped");
    }
}

/// Clears a claim, retrying transient store errors.
async fn release_claim(storage: &dyn DlqStorage, id: &str, token: ClaimToken) -> DlqResult<()> {
    let mut attempt = 1;
    loop {
        match storage.release(id, token).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < RELEASE_ATTEMPTS => {
                tracing::warn!(
                    "Release of DLQ entry {} failed (attempt {}): {}",
                    id,
                    attempt,
                    e
                );
                attempt += 1;
            }
            Err(e) => {
                tracing::error!("Giving up on releasing DLQ entry {}: {}", id, e);
                return Err(e);
            }
        }
    }
}

/// Publishes one claimed entry and settles its claim.
async fn republish(
    storage: Arc<dyn DlqStorage>,
    publisher: Arc<dyn Publisher>,
    entry: DlqEntry,
    token: ClaimToken,
) -> Settled {
    let message_id = entry.id().to_string();

    match publisher.publish(entry.topic(), &entry.message).await {
        Ok(()) => match storage.finalize(&message_id, token).await {
            Ok(removed) => Settled {
                message_id,
                outcome: Outcome::Published { removed },
                claim_settled: true,
            },
            Err(e) => {
                tracing::error!("Failed to finalize DLQ entry {}: {}", message_id, e);
                let claim_settled = release_claim(storage.as_ref(), &message_id, token)
                    .await
                    .is_ok();
                Settled {
                    message_id,
                    outcome: Outcome::Published { removed: false },
                    claim_settled,
                }
            }
        },
        Err(e) => {
            tracing::warn!("Republish of DLQ entry {} failed: {}", message_id, e);
            let claim_settled = release_claim(storage.as_ref(), &message_id, token)
                .await
                .is_ok();
            Settled {
                outcome: Outcome::Failed(PublishFailure {
                    message_id: message_id.clone(),
                    topic: entry.message.topic,
                    error: e.to_string(),
                }),
                message_id,
                claim_settled,
            }
        }
    }
}
