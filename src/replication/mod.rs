//! Consensus-backed replication
//!
//! The coordinator and its supporting pieces, organized into focused
//! submodules:
//!
//! - `core` - the `Replicator` entry points and its two long-running loops
//! - `engine` - the seam to the external consensus engine
//! - `envelope` - the request envelope and read-index wire codecs
//! - `idgen` - cluster-unique request id allocation
//! - `waiter` - the pending-request registry
//! - `apply_wait` - the apply-index cursor linearizable reads park on
//! - `membership` - the best-effort cluster membership view
//! - `snapshot` - the snapshot-install gate

pub mod apply_wait;
pub mod core;
pub mod engine;
pub mod envelope;
pub mod idgen;
pub mod membership;
pub mod snapshot;
pub mod waiter;

pub use self::core::Replicator;
pub use self::engine::{
    CommitEvent, CommittedEntry, ConfChange, ConfChangeKind, ConsensusEngine, EngineError,
    EngineStatus, EngineStreams, EntryKind,
};
pub use self::envelope::RequestEnvelope;
pub use self::membership::{MemberInfo, MemberStatus};
pub use self::snapshot::{SnapshotError, Snapshotter};
