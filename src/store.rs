//! The replicated state machine seam
//!
//! A [`Store`] is the user-supplied deterministic state machine: opaque bytes
//! in, opaque bytes out. The coordinator guarantees at-most-one `save` per
//! committed log index, so implementations need not deduplicate re-delivery.
//! `load` runs on reader tasks concurrently with `save`/`restore` on the
//! applier task; implementations must make that safe.

use crate::error::StoreError;

/// Position of a committed entry in the replicated log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaftEntry {
    pub index: u64,
    pub term: u64,
}

/// User-supplied deterministic state machine replicated by the coordinator.
pub trait Store: Send + Sync {
    /// Apply one committed mutation and return its response bytes.
    ///
    /// Invoked exactly once per committed index, in log order, by the
    /// commit-applier task.
    fn save(&self, entry: RaftEntry, payload: &[u8]) -> Result<Vec<u8>, StoreError>;

    /// Read-only query. Must be safe against a concurrent `save` or
    /// `restore`; the coordinator has already gated linearizability before
    /// calling this.
    fn load(&self, query: &[u8]) -> Result<Vec<u8>, StoreError>;

    /// Replace the entire state with the contents of a snapshot.
    fn restore(&self, snapshot: &[u8]) -> Result<(), StoreError>;

    /// Serialize the entire state for the snapshot subsystem.
    fn backup(&self) -> Result<Vec<u8>, StoreError>;

    /// Release resources. Called once during `Replicator::stop`.
    fn close(&self);
}
