//! Dead letter entry storage.
//!
//! `DlqStorage` is the seam for durable backends; `InMemoryDlqStorage` is the
//! engine used by default.

mod memory;
mod trait_def;

pub use memory::InMemoryDlqStorage;
pub use trait_def::{ClaimToken, ClaimedBatch, DlqStorage, EntryPredicate};
