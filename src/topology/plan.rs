//! Scaling plans.
//!
//! Pure decision logic: given what the cluster looks like right now and what
//! the resource declares, decide the state and the ordered operations for
//! this pass. Plans are never stored; the next pass computes a new one from
//! fresh state.

use std::fmt;

use crate::client::ClusterTopologySnapshot;
use crate::crd::TopologyState;

/// Facts gathered at the start of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterObservation {
    pub desired_leaders: i32,
    pub desired_followers: i32,
    /// Replicas currently declared on the leader StatefulSet.
    pub leader_statefulset_replicas: i32,
    /// Masters in leader-0's `CLUSTER NODES`.
    pub live_masters: i32,
    /// All nodes in leader-0's `CLUSTER NODES`.
    pub live_nodes: i32,
    /// Nodes flagged `fail` or with a disconnected link.
    pub failed_nodes: i32,
    pub slots_assigned: u32,
    /// Masters cover every slot exactly once.
    pub full_coverage: bool,
}

impl ClusterObservation {
    pub fn from_snapshot(
        snapshot: &ClusterTopologySnapshot,
        desired_leaders: i32,
        desired_followers: i32,
        leader_statefulset_replicas: i32,
    ) -> Self {
        Self {
            desired_leaders,
            desired_followers,
            leader_statefulset_replicas,
            live_masters: count(snapshot.masters().len()),
            live_nodes: count(snapshot.nodes.len()),
            failed_nodes: count(snapshot.failed_or_disconnected_count()),
            slots_assigned: snapshot.total_slots_assigned(),
            full_coverage: snapshot.has_full_coverage(),
        }
    }

    pub fn desired_total(&self) -> i32 {
        self.desired_leaders + self.desired_followers
    }

    /// Scale-down needs at least the declared leaders as live masters and no
    /// more masters than the StatefulSet holds. Fewer masters than pods means
    /// an earlier pass already removed some shards, or a pod never joined.
    fn scale_down_ready(&self) -> bool {
        self.leader_statefulset_replicas > self.desired_leaders
            && (self.desired_leaders..=self.leader_statefulset_replicas).contains(&self.live_masters)
    }
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Convergence state for an observation.
pub fn classify(obs: &ClusterObservation) -> TopologyState {
    if obs.leader_statefulset_replicas > obs.desired_leaders {
        return TopologyState::ScalingDown;
    }
    if obs.slots_assigned == 0 {
        return TopologyState::Uninitialized;
    }
    if !obs.full_coverage {
        return TopologyState::Bootstrapping;
    }
    if obs.live_nodes != obs.desired_total() {
        return if obs.live_masters > obs.desired_leaders {
            TopologyState::ScalingDown
        } else {
            TopologyState::ScalingUp
        };
    }
    if obs.failed_nodes > 0 {
        return TopologyState::Degraded;
    }
    TopologyState::Stable
}

/// One step of a plan. Shard indices are leader pod ordinals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedOperation {
    /// `--cluster create`, or native slot assignment for a single leader.
    CreateCluster,
    /// Attach followers missing from the cluster to their leaders.
    AttachFollowers,
    /// `--cluster add-node` for leader `index`.
    AddLeader { index: i32 },
    /// CLUSTER FAILOVER on the shard's leader pod if it is currently a replica.
    PromoteIfReplica { shard: i32 },
    /// Move every slot of `shard` to leader `to`. Skipped when empty.
    Reshard { shard: i32, to: i32 },
    /// `del-node` for every replica attached to the shard's leader.
    RemoveReplicas { shard: i32 },
    /// `del-node` for the shard's leader. Refused unless it owns no slots.
    RemoveLeader { shard: i32 },
    /// `--cluster rebalance`.
    Rebalance,
    /// `--cluster rebalance --cluster-use-empty-masters`, only on a stable cluster.
    RebalanceEmptyMasters,
    /// Rebalance once if any leader owns no slots.
    CheckEmptyMasters,
    /// CLUSTER MEET failed or disconnected masters at their current IP.
    RepairDisconnectedMasters,
}

impl PlannedOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            PlannedOperation::CreateCluster => "cluster-create",
            PlannedOperation::AttachFollowers => "attach-followers",
            PlannedOperation::AddLeader { .. } => "add-node",
            PlannedOperation::PromoteIfReplica { .. } => "cluster-failover",
            PlannedOperation::Reshard { .. } => "reshard",
            PlannedOperation::RemoveReplicas { .. } => "remove-followers",
            PlannedOperation::RemoveLeader { .. } => "del-node",
            PlannedOperation::Rebalance => "rebalance",
            PlannedOperation::RebalanceEmptyMasters => "rebalance-empty-masters",
            PlannedOperation::CheckEmptyMasters => "check-empty-masters",
            PlannedOperation::RepairDisconnectedMasters => "repair-masters",
        }
    }

    /// Changes cluster membership or slot ownership.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, PlannedOperation::CheckEmptyMasters)
    }
}

impl fmt::Display for PlannedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannedOperation::AddLeader { index } => write!(f, "{}(leader-{})", self.kind(), index),
            PlannedOperation::PromoteIfReplica { shard }
            | PlannedOperation::RemoveReplicas { shard }
            | PlannedOperation::RemoveLeader { shard } => write!(f, "{}(shard {})", self.kind(), shard),
            PlannedOperation::Reshard { shard, to } => {
                write!(f, "{}(shard {} -> leader-{})", self.kind(), shard, to)
            }
            _ => f.write_str(self.kind()),
        }
    }
}

/// Ordered operations for one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingPlan {
    pub state: TopologyState,
    pub operations: Vec<PlannedOperation>,
}

impl ScalingPlan {
    fn idle(state: TopologyState) -> Self {
        Self {
            state,
            operations: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Decide the operations for this pass.
pub fn plan(obs: &ClusterObservation) -> ScalingPlan {
    let state = classify(obs);

    if obs.leader_statefulset_replicas > obs.desired_leaders {
        if !obs.scale_down_ready() || obs.desired_leaders < 1 {
            return ScalingPlan::idle(state);
        }
        // Shards are removed highest first, so the survivors are 0..live_masters
        let operations = if obs.live_masters > obs.desired_leaders {
            scale_down(obs.live_masters, obs.desired_leaders)
        } else {
            vec![PlannedOperation::Rebalance]
        };
        return ScalingPlan { state, operations };
    }

    if obs.desired_leaders == 1 && !obs.full_coverage {
        return ScalingPlan {
            state,
            operations: vec![PlannedOperation::CreateCluster],
        };
    }

    if obs.live_nodes != obs.desired_total() {
        let operations = if obs.live_masters != obs.desired_leaders {
            if obs.live_masters <= 2 {
                vec![PlannedOperation::CreateCluster]
            } else if obs.live_masters < obs.desired_leaders {
                vec![
                    PlannedOperation::AddLeader {
                        index: obs.live_masters,
                    },
                    PlannedOperation::RebalanceEmptyMasters,
                ]
            } else {
                Vec::new()
            }
        } else if obs.desired_followers > 0 {
            vec![PlannedOperation::AttachFollowers]
        } else {
            Vec::new()
        };
        return ScalingPlan { state, operations };
    }

    if obs.failed_nodes > 0 && obs.desired_total() > 1 {
        return ScalingPlan {
            state,
            operations: vec![PlannedOperation::RepairDisconnectedMasters],
        };
    }

    ScalingPlan {
        state,
        operations: vec![PlannedOperation::CheckEmptyMasters],
    }
}

/// Per departing shard, highest first: promote, reshard, remove replicas,
/// remove leader. One rebalance at the end.
pub fn scale_down(current_leaders: i32, desired_leaders: i32) -> Vec<PlannedOperation> {
    let mut operations = Vec::new();
    if desired_leaders < 1 {
        return operations;
    }
    for shard in (desired_leaders..current_leaders).rev() {
        operations.push(PlannedOperation::PromoteIfReplica { shard });
        operations.push(PlannedOperation::Reshard {
            shard,
            to: shard % desired_leaders,
        });
        operations.push(PlannedOperation::RemoveReplicas { shard });
        operations.push(PlannedOperation::RemoveLeader { shard });
    }
    if !operations.is_empty() {
        operations.push(PlannedOperation::Rebalance);
    }
    operations
}
