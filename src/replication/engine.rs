//! Consensus engine seam
//!
//! The coordinator consumes a ready-made consensus engine through the
//! [`ConsensusEngine`] trait: propose/read-index/conf-change entry points
//! plus three event streams handed over at `start`. The adapter contract is
//! deliberately thin — events are exposed to the coordinator unchanged, with
//! no buffering or reordering on this side of the seam.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use raft::{ReadState, StateRole};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ReplResult;

/// Snapshot of the engine's role and current leader.
#[derive(Debug, Clone, Copy)]
pub struct EngineStatus {
    pub role: StateRole,
    /// Raft id of the current leader; 0 when no leader is known.
    pub leader_id: u64,
}

/// Kind of cluster membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfChangeKind {
    AddNode,
    RemoveNode,
}

/// Membership change proposed through the log.
///
/// `id` is drawn from the coordinator's dedicated conf-change counter, not
/// from the request-envelope id space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfChange {
    pub id: u64,
    pub kind: ConfChangeKind,
    pub node_id: u64,
    /// Opaque context carried with the change; the advertised peer URL for
    /// additions.
    pub context: Vec<u8>,
}

/// Payload kind of a committed log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Normal,
    ConfChange,
}

/// One committed entry delivered on the commit stream.
#[derive(Debug, Clone)]
pub struct CommittedEntry {
    pub index: u64,
    pub term: u64,
    pub kind: EntryKind,
    pub data: Vec<u8>,
}

/// Commit stream item. `None` is the install-snapshot sentinel: log
/// compaction forced the state machine to reinitialize from the latest
/// snapshot before apply resumes.
pub type CommitEvent = Option<CommittedEntry>;

/// Fatal error surfaced by the engine driver.
pub type EngineError = Box<dyn std::error::Error + Send + Sync>;

/// Event streams handed to the coordinator when the engine starts.
pub struct EngineStreams {
    /// Committed entries in log order, with snapshot sentinels interleaved.
    pub commits: mpsc::UnboundedReceiver<CommitEvent>,
    /// Read-index results: the request context from `read_index` paired with
    /// the commit index the read is linearizable at.
    pub read_states: mpsc::UnboundedReceiver<ReadState>,
    /// Fatal engine errors. Drained when the commit stream closes; any entry
    /// here means the consensus state is unrecoverable.
    pub errors: mpsc::UnboundedReceiver<EngineError>,
}

/// Interface of the external consensus engine.
///
/// Implementations drive the Raft protocol (election, log replication,
/// quorum) and surface commits and read states through [`EngineStreams`].
#[async_trait]
pub trait ConsensusEngine: Send + Sync {
    /// Raft id of the local member.
    fn id(&self) -> u64;

    /// Append an opaque entry to the replicated log. May suspend until the
    /// proposal is admitted; an error means the entry was not accepted.
    async fn propose(&self, data: Vec<u8>) -> ReplResult<()>;

    /// Append a membership change to the replicated log. The engine applies
    /// the change to its own membership view when the entry commits, before
    /// emitting it on the commit stream; the committed entry's data is the
    /// [`encode_conf_change`] encoding of the change.
    async fn propose_conf_change(&self, change: ConfChange) -> ReplResult<()>;

    /// Request a linearizable read barrier. The engine later emits the
    /// current commit index with the same `request_ctx` on the read-state
    /// stream.
    async fn read_index(&self, request_ctx: Vec<u8>) -> ReplResult<()>;

    /// Current role and leader, for introspection.
    fn status(&self) -> EngineStatus;

    /// Known peers: raft id to advertised URL.
    fn peers(&self) -> HashMap<u64, String>;

    /// When the transport last saw this peer as active; `None` if never.
    fn active_since(&self, node_id: u64) -> Option<Instant>;

    /// Start the engine driver and hand over its event streams. Called once
    /// by `Replicator::start`.
    async fn start(&self) -> ReplResult<EngineStreams>;

    /// Signal the engine to quiesce. The commit stream closes once the
    /// driver has wound down.
    fn shutdown(&self);
}

/// Encode a conf change for the log.
pub fn encode_conf_change(change: &ConfChange) -> ReplResult<Vec<u8>> {
    bincode::serialize(change).map_err(|source| crate::error::ReplError::Serialization {
        operation: "conf change",
        source,
    })
}

/// Decode a committed conf-change entry.
pub fn decode_conf_change(data: &[u8]) -> ReplResult<ConfChange> {
    bincode::deserialize(data).map_err(|source| crate::error::ReplError::Serialization {
        operation: "conf change",
        source,
    })
}
