use super::trait_def::{ClaimToken, ClaimedBatch, DlqStorage, EntryPredicate};
use crate::{DlqEntry, DlqError, DlqResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// An in-flight reservation on a stored entry.
#[derive(Debug, Clone, Copy)]
struct Claim {
    token: ClaimToken,
    /// Failure count when claimed; a later merge bumps the live count.
    failure_count: u32,
}

#[derive(Debug)]
struct Slot {
    entry: DlqEntry,
    claim: Option<Claim>,
}

/// In-memory DLQ storage implementation.
///
/// A single `RwLock` guards the map: writes take it exclusively, reads share it.
#[derive(Clone)]
pub struct InMemoryDlqStorage {
    slots: Arc<RwLock<HashMap<String, Slot>>>,
}

impl InMemoryDlqStorage {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Creates a shared storage handle.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of entries currently claimed by in-flight reprocessing.
    pub async fn in_flight(&self) -> usize {
        let slots = self.slots.read().await;
        slots.values().filter(|s| s.claim.is_some()).count()
    }
}

impl Default for InMemoryDlqStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn oldest_first(entries: &mut [DlqEntry]) {
    entries.sort_by(|a, b| {
        a.first_failure
            .cmp(&b.first_failure)
            .then_with(|| a.id().cmp(b.id()))
    });
}

#[async_trait]
impl DlqStorage for InMemoryDlqStorage {
    async fn send(&self, entry: DlqEntry) -> DlqResult<DlqEntry> {
        entry.validate().map_err(DlqError::InvalidEntry)?;

        let mut slots = self.slots.write().await;
        match slots.get_mut(entry.id()) {
            Some(slot) => {
                slot.entry.merge(entry);
                Ok(slot.entry.clone())
            }
            None => {
                let stored = entry.clone();
                slots.insert(entry.message.id.clone(), Slot { entry, claim: None });
                Ok(stored)
            }
        }
    }

    async fn get(&self, id: &str) -> DlqResult<Option<DlqEntry>> {
        let slots = self.slots.read().await;
        Ok(slots.get(id).map(|s| s.entry.clone()))
    }

    async fn remove(&self, id: &str) -> DlqResult<()> {
        let mut slots = self.slots.write().await;
        slots
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| DlqError::NotFound(id.to_string()))
    }

    async fn list_eligible(&self, predicate: EntryPredicate<'_>) -> DlqResult<Vec<DlqEntry>> {
        let slots = self.slots.read().await;

        let mut entries: Vec<DlqEntry> = slots
            .values()
            .filter(|s| s.claim.is_none() && predicate(&s.entry))
            .map(|s| s.entry.clone())
            .collect();
        drop(slots);

        oldest_first(&mut entries);
        Ok(entries)
    }

    async fn snapshot(&self) -> DlqResult<Vec<DlqEntry>> {
        let slots = self.slots.read().await;
        Ok(slots.values().map(|s| s.entry.clone()).collect())
    }

    async fn claim(&self, predicate: EntryPredicate<'_>, limit: usize) -> DlqResult<ClaimedBatch> {
        let token = ClaimToken::new();
        let mut slots = self.slots.write().await;

        let mut candidates: Vec<DlqEntry> = slots
            .values()
            .filter(|s| s.claim.is_none() && predicate(&s.entry))
            .map(|s| s.entry.clone())
            .collect();
        oldest_first(&mut candidates);
        candidates.truncate(limit);

        for entry in &candidates {
            if let Some(slot) = slots.get_mut(entry.id()) {
                slot.claim = Some(Claim {
                    token,
                    failure_count: entry.failure_count,
                });
            }
        }

        Ok(ClaimedBatch {
            token,
            entries: candidates,
        })
    }

    async fn claim_one(&self, id: &str) -> DlqResult<ClaimedBatch> {
        let token = ClaimToken::new();
        let mut slots = self.slots.write().await;

        let slot = slots
            .get_mut(id)
            .ok_or_else(|| DlqError::NotFound(id.to_string()))?;
        if slot.claim.is_some() {
            return Err(DlqError::InFlight(id.to_string()));
        }

        slot.claim = Some(Claim {
            token,
            failure_count: slot.entry.failure_count,
        });

        Ok(ClaimedBatch {
            token,
            entries: vec![slot.entry.clone()],
        })
    }

    async fn finalize(&self, id: &str, token: ClaimToken) -> DlqResult<bool> {
        let mut slots = self.slots.write().await;

        let Some(slot) = slots.get_mut(id) else {
            return Ok(false);
        };
        let Some(claim) = slot.claim.filter(|c| c.token == token) else {
            return Ok(false);
        };

        if slot.entry.failure_count != claim.failure_count {
            tracing::debug!(
                "Entry {} failed again while in flight, keeping it",
                id
            );
            slot.claim = None;
            return Ok(false);
        }

        slots.remove(id);
        Ok(true)
    }

    async fn release(&self, id: &str, token: ClaimToken) -> DlqResult<()> {
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get_mut(id) {
            if slot.claim.is_some_and(|c| c.token == token) {
                slot.claim = None;
            }
        }
        Ok(())
    }

    async fn len(&self) -> DlqResult<usize> {
        let slots = self.slots.read().await;
        Ok(slots.len())
    }
}
