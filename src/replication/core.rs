//! The replication coordinator
//!
//! `Replicator` bridges the consensus engine and the user store: it assigns
//! every mutation a cluster-unique id, proposes it through the log, parks the
//! caller on a one-shot slot, and completes the slot from the commit-applier
//! loop. Linearizable reads go through the engine's read-index protocol and
//! wait for the apply cursor instead of the log.
//!
//! Two long-running tasks are spawned by [`Replicator::start`]: the
//! commit-applier loop and the read-state loop. Errors the applier cannot
//! hand back to a caller (undecodable entries, snapshot failures, a dead
//! engine) are fatal: the applier panics and the process is expected to be
//! restarted by its supervisor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use crate::config::ReplicatorConfig;
use crate::error::{ReplError, ReplResult};
use crate::store::{RaftEntry, Store};

use super::apply_wait::ApplyWait;
use super::engine::{
    decode_conf_change, CommitEvent, CommittedEntry, ConfChange, ConfChangeKind, ConsensusEngine,
    EngineError, EngineStreams, EntryKind,
};
use super::envelope::{self, RequestEnvelope};
use super::idgen::RequestIdGenerator;
use super::membership::{resolve_members, MemberInfo};
use super::snapshot::{self, Snapshotter};
use super::waiter::PendingRequests;

use raft::ReadState;

/// Coordinates replication of a [`Store`] through a consensus engine.
pub struct Replicator {
    engine: Arc<dyn ConsensusEngine>,
    store: Arc<dyn Store>,
    snapshotter: Arc<dyn Snapshotter>,
    config: ReplicatorConfig,
    id_gen: RequestIdGenerator,
    /// Conf-change ids live in their own counter, separate from request ids.
    conf_change_seq: AtomicU64,
    waiter: Arc<PendingRequests>,
    apply_wait: Arc<ApplyWait>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Replicator {
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<dyn ConsensusEngine>,
        snapshotter: Arc<dyn Snapshotter>,
        config: ReplicatorConfig,
    ) -> Self {
        let id_gen = RequestIdGenerator::new(engine.id() as u16, SystemTime::now());
        Self {
            engine,
            store,
            snapshotter,
            config,
            id_gen,
            conf_change_seq: AtomicU64::new(0),
            waiter: Arc::new(PendingRequests::new()),
            apply_wait: Arc::new(ApplyWait::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Raft id of the local member.
    pub fn id(&self) -> u64 {
        self.engine.id()
    }

    /// Start the engine driver and spawn the applier and read-state loops.
    /// Calling `start` on an already-started replicator is a no-op.
    pub async fn start(&self) -> ReplResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ReplError::Shutdown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            warn!(node_id = self.engine.id(), "replicator already started");
            return Ok(());
        }

        let EngineStreams {
            commits,
            read_states,
            errors,
        } = self.engine.start().await?;

        tokio::spawn(commit_applier(
            self.engine.id(),
            self.store.clone(),
            self.snapshotter.clone(),
            self.waiter.clone(),
            self.apply_wait.clone(),
            commits,
            errors,
        ));
        tokio::spawn(read_state_loop(read_states, self.waiter.clone()));

        info!(node_id = self.engine.id(), "replicator started");
        Ok(())
    }

    /// Replicate one mutation and return the store's response bytes.
    ///
    /// Bounded by the configured replication timeout; see
    /// [`save_with_deadline`](Self::save_with_deadline) for caller-supplied
    /// deadlines.
    pub async fn save(&self, payload: Vec<u8>) -> ReplResult<Vec<u8>> {
        let deadline = Instant::now() + self.config.replication_timeout();
        self.save_with_deadline(deadline, payload).await
    }

    /// `save` under `min(deadline, now + replication timeout)`.
    #[instrument(skip(self, payload), fields(node_id = self.engine.id()))]
    pub async fn save_with_deadline(
        &self,
        deadline: Instant,
        payload: Vec<u8>,
    ) -> ReplResult<Vec<u8>> {
        self.check_running()?;

        let id = self.id_gen.next();
        let data = envelope::encode_envelope(&RequestEnvelope { id, payload })?;
        let slot = self.waiter.register(id)?;
        let deadline = self.child_deadline(deadline);

        if let Err(err) = self.engine.propose(data).await {
            warn!(request_id = id, error = %err, "engine rejected proposal");
            self.waiter.trigger(
                id,
                Err(ReplError::ProposeRejected {
                    reason: err.to_string(),
                }),
            );
            return Err(err);
        }

        match timeout_at(deadline, slot).await {
            Ok(Ok(result)) => result,
            Ok(Err(_closed)) => Err(ReplError::Shutdown),
            Err(_elapsed) => {
                // Whoever loses the race against the commit trigger finds
                // the slot gone and drops its value.
                self.waiter
                    .trigger(id, Err(ReplError::Timeout { operation: "save" }));
                Err(ReplError::Timeout { operation: "save" })
            }
        }
    }

    /// Linearizable read: resolves the engine's read-index barrier, waits
    /// for the apply cursor to reach it, then queries the store.
    pub async fn load(&self, query: Vec<u8>) -> ReplResult<Vec<u8>> {
        let deadline = Instant::now() + self.config.replication_timeout();
        self.load_with_deadline(deadline, query).await
    }

    /// `load` under `min(deadline, now + replication timeout)`.
    #[instrument(skip(self, query), fields(node_id = self.engine.id()))]
    pub async fn load_with_deadline(
        &self,
        deadline: Instant,
        query: Vec<u8>,
    ) -> ReplResult<Vec<u8>> {
        self.check_running()?;

        let read_id = self.id_gen.next();
        let slot = self.waiter.register(read_id)?;
        let deadline = self.child_deadline(deadline);

        if let Err(err) = self
            .engine
            .read_index(envelope::encode_read_ctx(read_id))
            .await
        {
            warn!(request_id = read_id, error = %err, "engine rejected read index request");
            self.waiter.trigger(
                read_id,
                Err(ReplError::ProposeRejected {
                    reason: err.to_string(),
                }),
            );
            return Err(err);
        }

        let index_bytes = match timeout_at(deadline, slot).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_closed)) => return Err(ReplError::Shutdown),
            Err(_elapsed) => {
                self.waiter
                    .trigger(read_id, Err(ReplError::Timeout { operation: "load" }));
                return Err(ReplError::Timeout { operation: "load" });
            }
        };
        let index = envelope::decode_index(&index_bytes)?;

        // The store must not be consulted before every entry up to the
        // read-index has been applied.
        if timeout_at(deadline, self.apply_wait.wait(index))
            .await
            .is_err()
        {
            debug!(request_id = read_id, index, "apply cursor missed the read deadline");
            return Err(ReplError::Timeout { operation: "load" });
        }

        self.store
            .load(&query)
            .map_err(|source| ReplError::Store {
                operation: "load",
                source,
            })
    }

    /// Add a member to the cluster after verifying its raft port accepts
    /// TCP connections.
    ///
    /// Bounded by the configured replication timeout; see
    /// [`add_member_with_deadline`](Self::add_member_with_deadline) for
    /// caller-supplied deadlines.
    pub async fn add_member(&self, node_id: u64, node_url: &str) -> ReplResult<()> {
        let deadline = Instant::now() + self.config.replication_timeout();
        self.add_member_with_deadline(deadline, node_id, node_url)
            .await
    }

    /// `add_member` under `min(deadline, now + replication timeout)`.
    pub async fn add_member_with_deadline(
        &self,
        deadline: Instant,
        node_id: u64,
        node_url: &str,
    ) -> ReplResult<()> {
        self.check_running()?;
        self.preflight(node_url).await?;
        let change = ConfChange {
            id: 0,
            kind: ConfChangeKind::AddNode,
            node_id,
            context: node_url.as_bytes().to_vec(),
        };
        self.propose_conf_change(deadline, change, "add member").await
    }

    /// Remove a member from the cluster.
    ///
    /// Bounded by the configured replication timeout; see
    /// [`remove_member_with_deadline`](Self::remove_member_with_deadline)
    /// for caller-supplied deadlines.
    pub async fn remove_member(&self, node_id: u64) -> ReplResult<()> {
        let deadline = Instant::now() + self.config.replication_timeout();
        self.remove_member_with_deadline(deadline, node_id).await
    }

    /// `remove_member` under `min(deadline, now + replication timeout)`.
    pub async fn remove_member_with_deadline(
        &self,
        deadline: Instant,
        node_id: u64,
    ) -> ReplResult<()> {
        self.check_running()?;
        let change = ConfChange {
            id: 0,
            kind: ConfChangeKind::RemoveNode,
            node_id,
            context: Vec::new(),
        };
        self.propose_conf_change(deadline, change, "remove member")
            .await
    }

    /// Current leader id and best-effort per-member status. Introspection
    /// only; see [`MemberStatus`](super::membership::MemberStatus).
    pub fn list_members(&self) -> (u64, HashMap<u64, MemberInfo>) {
        resolve_members(self.engine.as_ref())
    }

    /// Quiesce the engine, fail outstanding requests, and close the store.
    /// Double-stop is a no-op.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(node_id = self.engine.id(), "stopping replicator");
        self.engine.shutdown();
        self.waiter.cancel_all(|| ReplError::Shutdown);
        self.store.close();
    }

    async fn propose_conf_change(
        &self,
        deadline: Instant,
        mut change: ConfChange,
        operation: &'static str,
    ) -> ReplResult<()> {
        change.id = self.conf_change_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let slot = self.waiter.register(change.id)?;
        let deadline = self.child_deadline(deadline);

        debug!(
            change_id = change.id,
            target = change.node_id,
            "proposing configuration change"
        );
        if let Err(err) = self.engine.propose_conf_change(change.clone()).await {
            warn!(change_id = change.id, error = %err, "engine rejected configuration change");
            self.waiter.trigger(
                change.id,
                Err(ReplError::ProposeRejected {
                    reason: err.to_string(),
                }),
            );
            return Err(err);
        }

        match timeout_at(deadline, slot).await {
            Ok(Ok(result)) => result.map(|_entry_bytes| ()),
            Ok(Err(_closed)) => Err(ReplError::Shutdown),
            Err(_elapsed) => {
                self.waiter
                    .trigger(change.id, Err(ReplError::Timeout { operation }));
                Err(ReplError::Timeout { operation })
            }
        }
    }

    /// Verify a prospective member is reachable before burning a log entry
    /// on it.
    async fn preflight(&self, node_url: &str) -> ReplResult<()> {
        let address = host_port(node_url);
        match timeout(
            self.config.preflight_timeout(),
            TcpStream::connect(address.as_str()),
        )
        .await
        {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(err)) => Err(ReplError::Preflight {
                address,
                reason: err.to_string(),
            }),
            Err(_elapsed) => Err(ReplError::Preflight {
                address,
                reason: "connect timed out".to_string(),
            }),
        }
    }

    fn child_deadline(&self, caller: Instant) -> Instant {
        caller.min(Instant::now() + self.config.replication_timeout())
    }

    fn check_running(&self) -> ReplResult<()> {
        if !self.started.load(Ordering::SeqCst) || self.stopped.load(Ordering::SeqCst) {
            return Err(ReplError::Shutdown);
        }
        Ok(())
    }
}

/// Strip the scheme and path from a peer URL, leaving `host:port`.
fn host_port(url: &str) -> String {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    rest.split('/').next().unwrap_or(rest).to_string()
}

/// Long-running consumer of the commit stream.
///
/// Ordering per entry: the store mutation completes, then the caller's slot
/// is triggered, then the apply cursor advances. A reader woken by the
/// cursor therefore observes the state produced by the latest save.
async fn commit_applier(
    node_id: u64,
    store: Arc<dyn Store>,
    snapshotter: Arc<dyn Snapshotter>,
    waiter: Arc<PendingRequests>,
    apply_wait: Arc<ApplyWait>,
    mut commits: mpsc::UnboundedReceiver<CommitEvent>,
    mut errors: mpsc::UnboundedReceiver<EngineError>,
) {
    while let Some(event) = commits.recv().await {
        match event {
            None => {
                debug!(node_id, "commit stream sentinel, installing latest snapshot");
                snapshot::install_latest(node_id, snapshotter.as_ref(), store.as_ref());
            }
            Some(entry) => {
                apply_entry(node_id, &entry, store.as_ref(), &waiter, &apply_wait);
            }
        }
    }

    // The engine closed the commit stream. A queued error means it died
    // rather than quiesced, and the consensus state cannot be trusted.
    if let Some(err) = errors.recv().await {
        panic!("node {node_id:x}: consensus engine failed: {err}");
    }
    debug!(node_id, "commit stream closed, applier exiting");
}

fn apply_entry(
    node_id: u64,
    entry: &CommittedEntry,
    store: &dyn Store,
    waiter: &PendingRequests,
    apply_wait: &ApplyWait,
) {
    // Empty entries (leader no-ops) only advance the cursor.
    if !entry.data.is_empty() {
        match entry.kind {
            EntryKind::Normal => {
                let envelope = match envelope::decode_envelope(&entry.data) {
                    Ok(envelope) => envelope,
                    Err(err) => panic!(
                        "node {node_id:x}: undecodable committed entry at index {}: {err}",
                        entry.index
                    ),
                };
                let result = store
                    .save(
                        RaftEntry {
                            index: entry.index,
                            term: entry.term,
                        },
                        &envelope.payload,
                    )
                    .map_err(|source| ReplError::Store {
                        operation: "save",
                        source,
                    });
                waiter.trigger(envelope.id, result);
            }
            EntryKind::ConfChange => {
                let change = match decode_conf_change(&entry.data) {
                    Ok(change) => change,
                    Err(err) => panic!(
                        "node {node_id:x}: undecodable conf change at index {}: {err}",
                        entry.index
                    ),
                };
                debug!(
                    node_id,
                    change_id = change.id,
                    target = change.node_id,
                    "configuration change committed"
                );
                waiter.trigger(change.id, Ok(entry.data.clone()));
            }
        }
    }

    // Wake linearizable reads parked on this index.
    apply_wait.trigger(entry.index);
}

/// Long-running consumer of the read-state stream: completes the slot of the
/// read that requested the barrier with the commit index it resolved to.
async fn read_state_loop(
    mut read_states: mpsc::UnboundedReceiver<ReadState>,
    waiter: Arc<PendingRequests>,
) {
    while let Some(state) = read_states.recv().await {
        match envelope::decode_read_ctx(&state.request_ctx) {
            Ok(read_id) => {
                waiter.trigger(read_id, Ok(envelope::encode_index(state.index)));
            }
            Err(err) => {
                warn!(error = %err, "dropping read state with malformed request context");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{MemSnapshots, MemStore};

    #[test]
    fn test_host_port_strips_scheme_and_path() {
        assert_eq!(host_port("tcp://10.0.0.5:9020"), "10.0.0.5:9020");
        assert_eq!(host_port("http://peer-1:9020/raft"), "peer-1:9020");
        assert_eq!(host_port("10.0.0.5:9020"), "10.0.0.5:9020");
    }

    fn spawn_applier() -> (
        mpsc::UnboundedSender<CommitEvent>,
        mpsc::UnboundedSender<EngineError>,
        tokio::task::JoinHandle<()>,
    ) {
        let (commit_tx, commit_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(commit_applier(
            1,
            Arc::new(MemStore::new()),
            Arc::new(MemSnapshots::empty()),
            Arc::new(PendingRequests::new()),
            Arc::new(ApplyWait::new()),
            commit_rx,
            error_rx,
        ));
        (commit_tx, error_tx, handle)
    }

    #[tokio::test]
    async fn test_applier_exits_quietly_on_clean_close() {
        let (commit_tx, error_tx, handle) = spawn_applier();
        drop(commit_tx);
        drop(error_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_engine_error_at_stream_close_is_fatal() {
        let (commit_tx, error_tx, handle) = spawn_applier();
        error_tx.send("wal torn".into()).unwrap();
        drop(commit_tx);
        drop(error_tx);
        let err = handle.await.unwrap_err();
        assert!(err.is_panic(), "a queued engine error must kill the applier");
    }
}
