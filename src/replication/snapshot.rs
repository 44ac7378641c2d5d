//! Snapshot gate
//!
//! When the commit stream delivers its sentinel, the applier must
//! reinitialize the store from the latest snapshot before consuming further
//! entries. A missing snapshot is benign (fresh cluster, or a restart before
//! the first compaction); every other failure leaves the store presumed
//! inconsistent and is fatal to the applier.

use thiserror::Error;
use tracing::{info, warn};

use crate::store::Store;

/// Error from the snapshot subsystem.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// No snapshot has been taken yet.
    #[error("no snapshot available")]
    NoSnapshot,

    #[error("snapshot load failed: {0}")]
    Load(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Source of durable snapshots, owned by the snapshot subsystem.
pub trait Snapshotter: Send + Sync {
    /// Bytes of the most recent durable snapshot.
    fn load_latest(&self) -> Result<Vec<u8>, SnapshotError>;
}

/// Install the latest snapshot into the store.
///
/// Returns whether a snapshot was installed. Panics on any failure other
/// than [`SnapshotError::NoSnapshot`]: the store can no longer be trusted
/// and only a restart recovers the process.
pub(crate) fn install_latest(node_id: u64, snapshotter: &dyn Snapshotter, store: &dyn Store) -> bool {
    let data = match snapshotter.load_latest() {
        Ok(data) => data,
        Err(SnapshotError::NoSnapshot) => {
            warn!(node_id, "snapshot install requested but no snapshot exists");
            return false;
        }
        Err(err) => {
            panic!("node {node_id:x}: loading latest snapshot failed: {err}");
        }
    };
    if let Err(err) = store.restore(&data) {
        panic!("node {node_id:x}: store restore from snapshot failed: {err}");
    }
    info!(node_id, snapshot_bytes = data.len(), "restored store from snapshot");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{MemSnapshots, MemStore};

    #[test]
    fn test_missing_snapshot_is_benign() {
        let store = MemStore::new();
        let snapshots = MemSnapshots::empty();
        assert!(!install_latest(1, &snapshots, &store));
    }

    #[test]
    fn test_snapshot_restores_store() {
        let store = MemStore::new();
        let snapshots = MemSnapshots::with_state(&[("k", "A")]);
        assert!(install_latest(1, &snapshots, &store));
        assert_eq!(store.get("k").as_deref(), Some("A"));
    }

    #[test]
    #[should_panic(expected = "store restore from snapshot failed")]
    fn test_restore_failure_is_fatal() {
        let store = MemStore::new();
        store.fail_next_restore();
        let snapshots = MemSnapshots::with_state(&[("k", "A")]);
        install_latest(1, &snapshots, &store);
    }

    #[test]
    #[should_panic(expected = "loading latest snapshot failed")]
    fn test_snapshot_load_failure_is_fatal() {
        let store = MemStore::new();
        let snapshots = MemSnapshots::broken();
        install_latest(1, &snapshots, &store);
    }
}
