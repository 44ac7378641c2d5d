//! Consensus-backed state machine replication.
//!
//! `replistore` takes a user-supplied deterministic [`Store`] and replicates
//! every mutation across a cluster through an external Raft consensus
//! engine, offering linearizable reads and writes plus live membership
//! changes. See [`Replicator`] for the entry points.

pub mod config;
pub mod error;
pub mod replication;
pub mod store;

// Test doubles are exposed for integration tests
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::ReplicatorConfig;
pub use error::{ReplError, ReplResult, StoreError};
pub use replication::{
    ConfChange, ConfChangeKind, ConsensusEngine, EngineStatus, EngineStreams, MemberInfo,
    MemberStatus, Replicator, SnapshotError, Snapshotter,
};
pub use store::{RaftEntry, Store};
