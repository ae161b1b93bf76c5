use async_trait::async_trait;

use crate::domains::message::{EntryStatus, RecordedEntry, StateRef};
use crate::domains::transition::{FinalizedTransition, TransitionId};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordRole {
    Participant,
    Observer,
}

/// A party's local view of finalized history.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Applies a finalized transition atomically: every input known to this
    /// vault becomes consumed and every output becomes active, or nothing
    /// changes. Recording the same transition twice is a no-op.
    async fn record(&self, finalized: &FinalizedTransition, role: RecordRole) -> Result<()>;

    async fn load_entry(&self, reference: &StateRef) -> Result<RecordedEntry>;

    async fn load_transition(&self, id: &TransitionId) -> Result<FinalizedTransition>;

    /// `None` returns every entry regardless of status.
    async fn query_by_status(&self, status: Option<EntryStatus>) -> Result<Vec<RecordedEntry>>;

    async fn transitions(&self) -> Result<Vec<FinalizedTransition>>;
}

/// Network-wide double-spend guard consulted once per transition before it
/// is distributed for recording.
#[async_trait]
pub trait UniquenessService: Send + Sync {
    async fn commit(&self, id: &TransitionId, inputs: &[StateRef]) -> Result<()>;
}
