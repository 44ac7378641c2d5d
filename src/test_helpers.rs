//! Test doubles for integration tests
//!
//! Provides an in-process consensus engine whose commit and read-state
//! streams are driven by the test, an in-memory key-value store that records
//! every applied entry, and an in-memory snapshot source. All three support
//! failure injection so the timeout, rejection, and fatal paths can be
//! exercised without a real cluster.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use raft::{ReadState, StateRole};
use tokio::sync::mpsc;

use crate::error::{ReplError, ReplResult, StoreError};
use crate::replication::engine::{
    encode_conf_change, CommitEvent, CommittedEntry, ConfChange, ConsensusEngine, EngineError,
    EngineStatus, EngineStreams, EntryKind,
};
use crate::replication::snapshot::{SnapshotError, Snapshotter};
use crate::store::{RaftEntry, Store};

struct EngineSenders {
    commits: mpsc::UnboundedSender<CommitEvent>,
    read_states: mpsc::UnboundedSender<ReadState>,
    errors: mpsc::UnboundedSender<EngineError>,
}

/// In-process consensus engine driven by the test.
///
/// By default every proposal commits immediately at the next log index and
/// every read-index request resolves to the current commit index. Tests can
/// flip the engine into rejecting or blackholing mode and inject snapshot
/// sentinels or raw committed entries.
pub struct ScriptedEngine {
    node_id: u64,
    last_index: AtomicU64,
    senders: Mutex<Option<EngineSenders>>,
    streams: Mutex<Option<EngineStreams>>,
    reject_proposals: AtomicBool,
    blackhole: AtomicBool,
    held_commits: Mutex<Vec<CommitEvent>>,
    peers: Mutex<HashMap<u64, String>>,
    active: Mutex<HashMap<u64, Instant>>,
    leader_id: AtomicU64,
    role: Mutex<StateRole>,
}

impl ScriptedEngine {
    /// Single-node engine that leads its own cluster.
    pub fn new(node_id: u64) -> Self {
        Self::builder(node_id)
            .peer(node_id, &format!("tcp://node-{node_id}:9020"))
            .leader(node_id)
            .role(StateRole::Leader)
            .build()
    }

    pub fn builder(node_id: u64) -> ScriptedEngineBuilder {
        ScriptedEngineBuilder {
            node_id,
            peers: HashMap::new(),
            active: Vec::new(),
            leader_id: 0,
            role: StateRole::Follower,
        }
    }

    /// Refuse subsequent proposals and read-index requests.
    pub fn set_reject(&self, reject: bool) {
        self.reject_proposals.store(reject, Ordering::SeqCst);
    }

    /// Accept proposals and advance the log, but hold their commit events
    /// until [`flush_held_commits`](Self::flush_held_commits).
    pub fn set_blackhole(&self, blackhole: bool) {
        self.blackhole.store(blackhole, Ordering::SeqCst);
    }

    /// Deliver every commit held while blackholed.
    pub fn flush_held_commits(&self) {
        let held: Vec<_> = self.held_commits.lock().drain(..).collect();
        for event in held {
            self.emit(event);
        }
    }

    /// Inject an install-snapshot sentinel on the commit stream.
    pub fn emit_sentinel(&self) {
        self.emit(None);
    }

    /// Inject a raw committed entry.
    pub fn emit_commit(&self, entry: CommittedEntry) {
        self.last_index.fetch_max(entry.index, Ordering::SeqCst);
        self.emit(Some(entry));
    }

    /// Highest log index the engine has assigned.
    pub fn last_index(&self) -> u64 {
        self.last_index.load(Ordering::SeqCst)
    }

    fn emit(&self, event: CommitEvent) {
        if let Some(senders) = self.senders.lock().as_ref() {
            let _ = senders.commits.send(event);
        }
    }

    fn admit(&self, operation: &'static str) -> ReplResult<()> {
        if self.senders.lock().is_none() {
            return Err(ReplError::ProposeRejected {
                reason: format!("{operation}: engine stopped"),
            });
        }
        if self.reject_proposals.load(Ordering::SeqCst) {
            return Err(ReplError::ProposeRejected {
                reason: format!("{operation}: not leader"),
            });
        }
        Ok(())
    }

    fn commit(&self, kind: EntryKind, data: Vec<u8>) {
        let index = self.last_index.fetch_add(1, Ordering::SeqCst) + 1;
        let event = Some(CommittedEntry {
            index,
            term: 1,
            kind,
            data,
        });
        if self.blackhole.load(Ordering::SeqCst) {
            self.held_commits.lock().push(event);
        } else {
            self.emit(event);
        }
    }
}

#[async_trait]
impl ConsensusEngine for ScriptedEngine {
    fn id(&self) -> u64 {
        self.node_id
    }

    async fn propose(&self, data: Vec<u8>) -> ReplResult<()> {
        self.admit("propose")?;
        self.commit(EntryKind::Normal, data);
        Ok(())
    }

    async fn propose_conf_change(&self, change: ConfChange) -> ReplResult<()> {
        self.admit("propose conf change")?;
        let data = encode_conf_change(&change)?;
        self.commit(EntryKind::ConfChange, data);
        Ok(())
    }

    async fn read_index(&self, request_ctx: Vec<u8>) -> ReplResult<()> {
        self.admit("read index")?;
        let index = self.last_index.load(Ordering::SeqCst);
        if let Some(senders) = self.senders.lock().as_ref() {
            let _ = senders.read_states.send(ReadState { index, request_ctx });
        }
        Ok(())
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            role: *self.role.lock(),
            leader_id: self.leader_id.load(Ordering::SeqCst),
        }
    }

    fn peers(&self) -> HashMap<u64, String> {
        self.peers.lock().clone()
    }

    fn active_since(&self, node_id: u64) -> Option<Instant> {
        self.active.lock().get(&node_id).copied()
    }

    async fn start(&self) -> ReplResult<EngineStreams> {
        self.streams.lock().take().ok_or_else(|| ReplError::Internal {
            message: "engine already started".to_string(),
        })
    }

    fn shutdown(&self) {
        // Dropping the senders closes every stream.
        self.senders.lock().take();
    }
}

pub struct ScriptedEngineBuilder {
    node_id: u64,
    peers: HashMap<u64, String>,
    active: Vec<u64>,
    leader_id: u64,
    role: StateRole,
}

impl ScriptedEngineBuilder {
    pub fn peer(mut self, node_id: u64, url: &str) -> Self {
        self.peers.insert(node_id, url.to_string());
        self
    }

    pub fn active(mut self, node_id: u64) -> Self {
        self.active.push(node_id);
        self
    }

    pub fn leader(mut self, leader_id: u64) -> Self {
        self.leader_id = leader_id;
        self
    }

    pub fn role(mut self, role: StateRole) -> Self {
        self.role = role;
        self
    }

    pub fn build(self) -> ScriptedEngine {
        let (commit_tx, commit_rx) = mpsc::unbounded_channel();
        let (read_tx, read_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        ScriptedEngine {
            node_id: self.node_id,
            last_index: AtomicU64::new(0),
            senders: Mutex::new(Some(EngineSenders {
                commits: commit_tx,
                read_states: read_tx,
                errors: error_tx,
            })),
            streams: Mutex::new(Some(EngineStreams {
                commits: commit_rx,
                read_states: read_rx,
                errors: error_rx,
            })),
            reject_proposals: AtomicBool::new(false),
            blackhole: AtomicBool::new(false),
            held_commits: Mutex::new(Vec::new()),
            peers: Mutex::new(self.peers),
            active: Mutex::new(self.active.into_iter().map(|id| (id, now)).collect()),
            leader_id: AtomicU64::new(self.leader_id),
            role: Mutex::new(self.role),
        }
    }
}

/// In-memory key-value store over `key=value` payloads.
///
/// Records `(index, term, payload)` for every applied entry so tests can
/// assert at-most-once apply and ordering.
#[derive(Default)]
pub struct MemStore {
    state: Mutex<HashMap<String, String>>,
    applied: Mutex<Vec<(u64, u64, Vec<u8>)>>,
    load_calls: AtomicU64,
    fail_next_save: AtomicBool,
    fail_next_restore: AtomicBool,
    closed: AtomicBool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.state.lock().get(key).cloned()
    }

    /// Every `(index, term, payload)` applied so far, in apply order.
    pub fn applied(&self) -> Vec<(u64, u64, Vec<u8>)> {
        self.applied.lock().clone()
    }

    pub fn load_calls(&self) -> u64 {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_restore(&self) {
        self.fail_next_restore.store(true, Ordering::SeqCst);
    }

    /// Serialize a key-value map the way `backup`/`restore` expect it.
    pub fn encode_state(pairs: &[(&str, &str)]) -> Vec<u8> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        bincode::serialize(&map).expect("state map serializes")
    }
}

impl Store for MemStore {
    fn save(&self, entry: RaftEntry, payload: &[u8]) -> Result<Vec<u8>, StoreError> {
        if self.fail_next_save.swap(false, Ordering::SeqCst) {
            return Err("injected save failure".into());
        }
        self.applied
            .lock()
            .push((entry.index, entry.term, payload.to_vec()));
        let text = String::from_utf8_lossy(payload);
        if let Some((key, value)) = text.split_once('=') {
            self.state
                .lock()
                .insert(key.to_string(), value.to_string());
        }
        Ok(b"ok".to_vec())
    }

    fn load(&self, query: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        let key = String::from_utf8_lossy(query).to_string();
        match self.state.lock().get(&key) {
            Some(value) => Ok(value.clone().into_bytes()),
            None => Err(format!("key not found: {key}").into()),
        }
    }

    fn restore(&self, snapshot: &[u8]) -> Result<(), StoreError> {
        if self.fail_next_restore.swap(false, Ordering::SeqCst) {
            return Err("injected restore failure".into());
        }
        let state: HashMap<String, String> = bincode::deserialize(snapshot)?;
        *self.state.lock() = state;
        Ok(())
    }

    fn backup(&self) -> Result<Vec<u8>, StoreError> {
        Ok(bincode::serialize(&*self.state.lock())?)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// In-memory snapshot source.
pub struct MemSnapshots {
    data: Option<Vec<u8>>,
    broken: bool,
}

impl MemSnapshots {
    /// No snapshot taken yet (fresh cluster).
    pub fn empty() -> Self {
        Self {
            data: None,
            broken: false,
        }
    }

    /// A snapshot holding the given key-value state.
    pub fn with_state(pairs: &[(&str, &str)]) -> Self {
        Self {
            data: Some(MemStore::encode_state(pairs)),
            broken: false,
        }
    }

    /// Fails every load with a non-benign error.
    pub fn broken() -> Self {
        Self {
            data: None,
            broken: true,
        }
    }
}

impl Snapshotter for MemSnapshots {
    fn load_latest(&self) -> Result<Vec<u8>, SnapshotError> {
        if self.broken {
            return Err(SnapshotError::Load("injected snapshot failure".into()));
        }
        match &self.data {
            Some(data) => Ok(data.clone()),
            None => Err(SnapshotError::NoSnapshot),
        }
    }
}
