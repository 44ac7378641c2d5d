//! Cluster membership view
//!
//! Derives a per-peer status snapshot from the engine's role, its known
//! leader, and transport activity. The view is heuristic introspection for
//! operators and clients: transport activity lags reality, so a peer may be
//! briefly misclassified. It must never feed correctness decisions.

use std::collections::HashMap;

use raft::StateRole;
use serde::{Deserialize, Serialize};

use super::engine::ConsensusEngine;

/// Best-effort liveness/role classification of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberStatus {
    Leader,
    Follower,
    Candidate,
    Offline,
    Unknown,
}

/// One member of the cluster as seen from this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub node_id: u64,
    pub url: String,
    pub status: MemberStatus,
}

/// Build the membership view: current leader id plus per-peer info.
pub(crate) fn resolve_members(
    engine: &dyn ConsensusEngine,
) -> (u64, HashMap<u64, MemberInfo>) {
    let status = engine.status();
    let leader = status.leader_id;
    let self_id = engine.id();

    let mut members = HashMap::new();
    for (node_id, url) in engine.peers() {
        let member_status = if node_id == leader {
            MemberStatus::Leader
        } else if node_id == self_id {
            match status.role {
                StateRole::Follower => MemberStatus::Follower,
                StateRole::Candidate | StateRole::PreCandidate => MemberStatus::Candidate,
                _ => MemberStatus::Unknown,
            }
        } else if engine.active_since(node_id).is_none() {
            MemberStatus::Offline
        } else if leader != 0 {
            // Best-effort: the transport saw the peer and somebody leads.
            MemberStatus::Follower
        } else {
            MemberStatus::Unknown
        };

        members.insert(
            node_id,
            MemberInfo {
                node_id,
                url,
                status: member_status,
            },
        );
    }
    (leader, members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedEngine;

    fn view(engine: &ScriptedEngine) -> (u64, HashMap<u64, MemberInfo>) {
        resolve_members(engine)
    }

    #[test]
    fn test_leader_wins_over_every_other_rule() {
        let engine = ScriptedEngine::builder(1)
            .peer(1, "tcp://a:9020")
            .peer(2, "tcp://b:9020")
            .leader(2)
            .role(StateRole::Follower)
            .build();
        // Peer 2 leads even though the transport never saw it.
        let (leader, members) = view(&engine);
        assert_eq!(leader, 2);
        assert_eq!(members[&2].status, MemberStatus::Leader);
    }

    #[test]
    fn test_self_maps_local_role() {
        let engine = ScriptedEngine::builder(1)
            .peer(1, "tcp://a:9020")
            .peer(2, "tcp://b:9020")
            .leader(2)
            .role(StateRole::Candidate)
            .build();
        let (_, members) = view(&engine);
        assert_eq!(members[&1].status, MemberStatus::Candidate);
    }

    #[test]
    fn test_silent_transport_means_offline() {
        let engine = ScriptedEngine::builder(1)
            .peer(1, "tcp://a:9020")
            .peer(2, "tcp://b:9020")
            .peer(3, "tcp://c:9020")
            .leader(1)
            .role(StateRole::Leader)
            .active(3)
            .build();
        let (_, members) = view(&engine);
        assert_eq!(members[&1].status, MemberStatus::Leader);
        assert_eq!(members[&2].status, MemberStatus::Offline);
        assert_eq!(members[&3].status, MemberStatus::Follower);
    }

    #[test]
    fn test_no_leader_and_active_peer_is_unknown() {
        let engine = ScriptedEngine::builder(1)
            .peer(1, "tcp://a:9020")
            .peer(2, "tcp://b:9020")
            .leader(0)
            .role(StateRole::Candidate)
            .active(2)
            .build();
        let (leader, members) = view(&engine);
        assert_eq!(leader, 0);
        assert_eq!(members[&1].status, MemberStatus::Candidate);
        assert_eq!(members[&2].status, MemberStatus::Unknown);
    }
}
