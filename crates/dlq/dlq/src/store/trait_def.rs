use crate::{DlqEntry, DlqResult};
use async_trait::async_trait;
use uuid::Uuid;

/// Predicate over entries, used for eligibility and claim selection.
pub type EntryPredicate<'a> = &'a (dyn Fn(&DlqEntry) -> bool + Send + Sync);

/// Storage backend for dead letter entries.
///
/// Implementations own all entry state. Callers only ever receive clones, and
/// every mutation goes through one of these operations. Implementations must
/// never call out to a collaborator while holding internal locks.
#[async_trait]
pub trait DlqStorage: Send + Sync {
    /// Inserts an entry, or merges it into the live entry with the same message ID.
    ///
    /// Returns the stored entry after the insert or merge.
    async fn send(&self, entry: DlqEntry) -> DlqResult<DlqEntry>;

    /// Gets the entry for a message ID.
    async fn get(&self, id: &str) -> DlqResult<Option<DlqEntry>>;

    /// Removes the entry for a message ID.
    ///
    /// Returns `DlqError::NotFound` if no entry exists.
    async fn remove(&self, id: &str) -> DlqResult<()>;

    /// Lists unclaimed entries matching `predicate`, oldest `first_failure` first.
    async fn list_eligible(&self, predicate: EntryPredicate<'_>) -> DlqResult<Vec<DlqEntry>>;

    /// Returns every entry, claimed or not, read under a single lock acquisition.
    async fn snapshot(&self) -> DlqResult<Vec<DlqEntry>>;

    /// Marks up to `limit` unclaimed entries matching `predicate` as in flight.
    ///
    /// Selection is oldest first and atomic with respect to other claims, so two
    /// concurrent callers never receive the same entry.
    async fn claim(&self, predicate: EntryPredicate<'_>, limit: usize) -> DlqResult<ClaimedBatch>;

    /// Claims a single entry by ID.
    ///
    /// Returns `DlqError::NotFound` if absent, `DlqError::InFlight` if already claimed.
    async fn claim_one(&self, id: &str) -> DlqResult<ClaimedBatch>;

    /// Settles a successful republish: drops the entry if `token` still holds it.
    ///
    /// If a new failure was merged while the entry was in flight, the entry is
    /// kept and unclaimed instead. Returns whether the entry was removed.
    async fn finalize(&self, id: &str, token: ClaimToken) -> DlqResult<bool>;

    /// Settles a failed or abandoned republish: clears the in-flight marker,
    /// leaving the entry exactly as it was before the claim.
    async fn release(&self, id: &str, token: ClaimToken) -> DlqResult<()>;

    /// Returns the number of stored entries.
    async fn len(&self) -> DlqResult<usize>;

    /// Checks if the store is empty.
    async fn is_empty(&self) -> DlqResult<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Identifies one claim; settling requires the token that made the claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClaimToken(Uuid);

impl ClaimToken {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ClaimToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entries reserved by one claim, in selection order.
#[derive(Debug, Clone)]
pub struct ClaimedBatch {
    /// Token to settle each entry with.
    pub token: ClaimToken,
    /// Copies of the claimed entries as they were at claim time.
    pub entries: Vec<DlqEntry>,
}

impl ClaimedBatch {
    /// Number of claimed entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks if nothing was claimed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
