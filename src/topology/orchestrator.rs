//! Topology Orchestrator.
//!
//! Drives a live Redis Cluster towards the declared shape. Each operation
//! re-reads the state it depends on right before mutating anything, so a
//! pass can be abandoned at any point and the next one starts from scratch.

use tracing::{debug, info, instrument, warn};

use crate::client::{ClusterTopologySnapshot, SlotRange};
use crate::crd::{ClusterRole, TOTAL_HASH_SLOTS, TopologyState};
use crate::topology::addressing::{Addressing, NodeRef};
use crate::topology::command::ClusterCommand;
use crate::topology::error::{Result, TopologyError};
use crate::topology::executor::{CommandExecutor, CommandOutput};
use crate::topology::inspector::ClusterInspector;
use crate::topology::plan::{ClusterObservation, PlannedOperation, ScalingPlan, plan};

/// Number of `[OK]` lines printed by a clean `redis-cli --cluster check`.
const HEALTHY_CHECK_MARKERS: usize = 3;

/// What a converge pass did.
#[derive(Debug)]
pub struct ConvergeReport {
    pub state: TopologyState,
    pub executed: Vec<PlannedOperation>,
    pub skipped: Vec<PlannedOperation>,
    /// The operation that stopped the pass, if any.
    pub failure: Option<(PlannedOperation, TopologyError)>,
}

impl ConvergeReport {
    fn new(state: TopologyState) -> Self {
        Self {
            state,
            executed: Vec::new(),
            skipped: Vec::new(),
            failure: None,
        }
    }

    /// Something was planned and every step ran without error.
    pub fn ran_to_completion(&self) -> bool {
        self.failure.is_none() && !(self.executed.is_empty() && self.skipped.is_empty())
    }

    pub fn executed_count(&self, kind: &str) -> usize {
        self.executed.iter().filter(|op| op.kind() == kind).count()
    }
}

/// Whether an operation changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Executed,
    Skipped,
}

pub struct TopologyOrchestrator<E, I> {
    executor: E,
    inspector: I,
    addressing: Addressing,
    desired_leaders: i32,
    desired_followers: i32,
}

impl<E: CommandExecutor, I: ClusterInspector> TopologyOrchestrator<E, I> {
    pub fn new(
        executor: E,
        inspector: I,
        addressing: Addressing,
        desired_leaders: i32,
        desired_followers: i32,
    ) -> Self {
        Self {
            executor,
            inspector,
            addressing,
            desired_leaders,
            desired_followers,
        }
    }

    pub fn inspector(&self) -> &I {
        &self.inspector
    }

    pub fn addressing(&self) -> &Addressing {
        &self.addressing
    }

    /// Resolve a pod to a node reference in this pass's addressing mode.
    pub async fn node(&self, pod_name: &str) -> Result<NodeRef> {
        let ip = if self.addressing.needs_pod_ip() {
            Some(self.inspector.pod_ip(pod_name).await?)
        } else {
            None
        };
        self.addressing.node_ref(pod_name, ip.as_deref())
    }

    pub async fn leader(&self, index: i32) -> Result<NodeRef> {
        self.node(&self.addressing.cluster_pod(ClusterRole::Leader, index))
            .await
    }

    pub async fn follower(&self, index: i32) -> Result<NodeRef> {
        self.node(&self.addressing.cluster_pod(ClusterRole::Follower, index))
            .await
    }

    /// `CLUSTER NODES` from leader-0.
    pub async fn snapshot(&self) -> Result<ClusterTopologySnapshot> {
        let anchor = self.leader(0).await?;
        self.inspector.cluster_nodes(&anchor).await
    }

    async fn execute(&self, target: &NodeRef, command: ClusterCommand) -> Result<CommandOutput> {
        self.executor.execute(target, &command).await
    }

    /// Nodes of a role in leader-0's view; `None` counts every node.
    #[instrument(skip(self), fields(name = %self.addressing.name()))]
    pub async fn check_node_count(&self, role: Option<ClusterRole>) -> Result<i32> {
        let snapshot = self.snapshot().await?;
        let flag = role.map(|r| r.node_flag()).unwrap_or("");
        let count = snapshot.nodes_of_type(flag).len();
        debug!(count, "Counted cluster nodes");
        Ok(i32::try_from(count).unwrap_or(i32::MAX))
    }

    /// Nodes flagged failed or with a disconnected link.
    pub async fn check_cluster_state(&self) -> Result<i32> {
        let snapshot = self.snapshot().await?;
        Ok(i32::try_from(snapshot.failed_or_disconnected_count()).unwrap_or(i32::MAX))
    }

    pub async fn observe(&self, leader_statefulset_replicas: i32) -> Result<ClusterObservation> {
        let snapshot = self.snapshot().await?;
        Ok(ClusterObservation::from_snapshot(
            &snapshot,
            self.desired_leaders,
            self.desired_followers,
            leader_statefulset_replicas,
        ))
    }

    /// Form the cluster from leader-0..N-1.
    ///
    /// With one leader, slots are assigned natively instead because
    /// `--cluster create` needs at least three masters.
    #[instrument(skip(self), fields(name = %self.addressing.name()))]
    pub async fn create_cluster(&self) -> Result<Outcome> {
        if self.desired_leaders == 1 {
            return self.bootstrap_single_leader().await;
        }

        let mut addresses = Vec::new();
        for index in 0..self.desired_leaders {
            addresses.push(self.leader(index).await?.address());
        }
        let anchor = self.leader(0).await?;
        info!(leaders = addresses.len(), "Creating Redis cluster");
        self.execute(&anchor, ClusterCommand::Create { addresses })
            .await?;
        Ok(Outcome::Executed)
    }

    async fn bootstrap_single_leader(&self) -> Result<Outcome> {
        let leader = self.leader(0).await?;
        let assigned: u32 = self
            .inspector
            .cluster_slots(&leader)
            .await?
            .iter()
            .map(|a| a.range.count())
            .sum();
        if assigned >= TOTAL_HASH_SLOTS {
            debug!("All slots already assigned");
            return Ok(Outcome::Skipped);
        }

        if let Err(e) = self
            .execute(&leader, ClusterCommand::Reset { hard: false })
            .await
        {
            warn!(error = %e, "CLUSTER RESET failed, flushing before retry");
            self.execute(&leader, ClusterCommand::FlushAll).await?;
            self.execute(&leader, ClusterCommand::Reset { hard: false })
                .await?;
        }

        let last_slot = u16::try_from(TOTAL_HASH_SLOTS - 1).unwrap_or(u16::MAX);
        info!(pod = %leader.pod_name, "Assigning all slots to single leader");
        self.execute(
            &leader,
            ClusterCommand::AddSlots {
                range: SlotRange::new(0, last_slot),
            },
        )
        .await?;
        Ok(Outcome::Executed)
    }

    /// Attach followers that are not yet in the cluster. Follower `i` goes to
    /// leader `i % leaders`. Returns how many were attached.
    #[instrument(skip(self), fields(name = %self.addressing.name()))]
    pub async fn attach_followers(&self) -> Result<u32> {
        if self.desired_leaders < 1 {
            return Ok(0);
        }
        let anchor = self.leader(0).await?;
        let snapshot = self.inspector.cluster_nodes(&anchor).await?;

        let mut attached = 0;
        for index in 0..self.desired_followers {
            let pod = self.addressing.cluster_pod(ClusterRole::Follower, index);
            let ip = match self.inspector.pod_ip(&pod).await {
                Ok(ip) => ip,
                Err(e) => {
                    warn!(pod = %pod, error = %e, "Skipping follower without IP");
                    continue;
                }
            };
            if node_present(&snapshot, &pod, &ip) {
                debug!(pod = %pod, "Follower already in cluster");
                continue;
            }

            let follower = self.addressing.node_ref(&pod, Some(&ip))?;
            match self.inspector.ping(&follower).await {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    warn!(pod = %pod, "Follower did not answer PING, skipping");
                    continue;
                }
            }

            let leader = self.leader(index % self.desired_leaders).await?;
            info!(follower = %pod, leader = %leader.pod_name, "Attaching follower");
            self.execute(
                &anchor,
                ClusterCommand::AddNode {
                    new_node: follower.address(),
                    existing_node: leader.address(),
                    replica: true,
                },
            )
            .await?;
            attached += 1;
        }
        Ok(attached)
    }

    /// Add leader `index` as an empty master through leader-0.
    #[instrument(skip(self), fields(name = %self.addressing.name()))]
    pub async fn add_leader(&self, index: i32) -> Result<Outcome> {
        let new_node = self.leader(index).await?;
        let existing = self.leader(0).await?;
        info!(pod = %new_node.pod_name, "Adding leader to cluster");
        self.execute(
            &existing,
            ClusterCommand::AddNode {
                new_node: new_node.address(),
                existing_node: existing.address(),
                replica: false,
            },
        )
        .await?;
        Ok(Outcome::Executed)
    }

    /// Node ID of a leader pod.
    pub async fn leader_node_id(&self, index: i32) -> Result<String> {
        let node = self.leader(index).await?;
        self.inspector.node_id(&node).await
    }

    /// Slots owned by a node according to leader-0.
    pub async fn count_slots_owned_by(&self, node_id: &str) -> Result<u32> {
        let anchor = self.leader(0).await?;
        self.inspector.count_slots_owned_by(&anchor, node_id).await
    }

    /// Move every slot of `from_node_id` to `to_node_id`. Skipped when the
    /// source owns nothing.
    #[instrument(skip(self), fields(name = %self.addressing.name()))]
    pub async fn reshard_away(&self, from_node_id: &str, to_node_id: &str) -> Result<Outcome> {
        if from_node_id.is_empty() || to_node_id.is_empty() {
            return Err(TopologyError::precondition("reshard with an unknown node id"));
        }
        if from_node_id == to_node_id {
            return Err(TopologyError::precondition(format!(
                "reshard source and target are both {}",
                from_node_id
            )));
        }

        let anchor = self.leader(0).await?;
        let slots = self
            .inspector
            .count_slots_owned_by(&anchor, from_node_id)
            .await?;
        if slots == 0 {
            info!(node_id = from_node_id, "Node owns no slots, skipping reshard");
            return Ok(Outcome::Skipped);
        }

        info!(from = from_node_id, to = to_node_id, slots, "Resharding slots");
        self.execute(
            &anchor,
            ClusterCommand::Reshard {
                anchor: anchor.address(),
                from_node_id: from_node_id.to_string(),
                to_node_id: to_node_id.to_string(),
                slots,
            },
        )
        .await?;
        Ok(Outcome::Executed)
    }

    /// Reshard leader `shard`'s slots to leader `to`.
    pub async fn reshard_shard(&self, shard: i32, to: i32) -> Result<Outcome> {
        let from_id = self.leader_node_id(shard).await?;
        let to_id = self.leader_node_id(to).await?;
        self.reshard_away(&from_id, &to_id).await
    }

    /// `del-node` a node that owns no slots. Refuses otherwise.
    #[instrument(skip(self), fields(name = %self.addressing.name()))]
    pub async fn remove_node(&self, node_id: &str) -> Result<Outcome> {
        if node_id.is_empty() {
            return Err(TopologyError::precondition("remove with an unknown node id"));
        }
        let anchor = self.leader(0).await?;
        let slots = self.inspector.count_slots_owned_by(&anchor, node_id).await?;
        if slots != 0 {
            warn!(node_id, slots, "Refusing to remove a node that still owns slots");
            return Err(TopologyError::precondition(format!(
                "node {} still owns {} slots",
                node_id, slots
            )));
        }

        info!(node_id, "Removing node from cluster");
        self.execute(
            &anchor,
            ClusterCommand::DelNode {
                anchor: anchor.address(),
                node_id: node_id.to_string(),
            },
        )
        .await?;
        Ok(Outcome::Executed)
    }

    /// Remove every replica attached to `leader_node_id`.
    #[instrument(skip(self), fields(name = %self.addressing.name()))]
    pub async fn remove_attached_replicas(&self, leader_node_id: &str) -> Result<usize> {
        if leader_node_id.is_empty() {
            return Err(TopologyError::precondition("leader node id is unknown"));
        }
        let anchor = self.leader(0).await?;
        let replicas = self
            .inspector
            .attached_replicas(&anchor, leader_node_id)
            .await?;

        for replica_id in &replicas {
            info!(replica = %replica_id, leader = leader_node_id, "Removing follower from cluster");
            self.execute(
                &anchor,
                ClusterCommand::DelNode {
                    anchor: anchor.address(),
                    node_id: replica_id.clone(),
                },
            )
            .await?;
        }
        Ok(replicas.len())
    }

    /// `--cluster rebalance` anchored at leader-0.
    #[instrument(skip(self), fields(name = %self.addressing.name()))]
    pub async fn rebalance(&self, use_empty_masters: bool) -> Result<Outcome> {
        let anchor = self.leader(0).await?;
        info!(use_empty_masters, "Rebalancing cluster");
        self.execute(
            &anchor,
            ClusterCommand::Rebalance {
                anchor: anchor.address(),
                use_empty_masters,
            },
        )
        .await?;
        Ok(Outcome::Executed)
    }

    /// Empty-master rebalance, only when the cluster is stable.
    pub async fn rebalance_empty_masters_if_stable(&self) -> Result<Outcome> {
        if !self.is_stable().await? {
            info!("Cluster not stable, skipping empty-master rebalance");
            return Ok(Outcome::Skipped);
        }
        self.rebalance(true).await
    }

    /// `cluster_state:ok`, no slot migrations, no unstable nodes.
    pub async fn is_stable(&self) -> Result<bool> {
        let anchor = self.leader(0).await?;
        let info = self.inspector.cluster_info(&anchor).await?;
        if !info.state_ok || info.migration_active_tasks > 0 {
            return Ok(false);
        }
        let snapshot = self.inspector.cluster_nodes(&anchor).await?;
        Ok(snapshot.is_stable())
    }

    /// Rebalance once if any live leader owns no slots or its count is unknown.
    #[instrument(skip(self), fields(name = %self.addressing.name()))]
    pub async fn check_if_empty_masters(&self) -> Result<Outcome> {
        let leaders = self.check_node_count(Some(ClusterRole::Leader)).await?;
        let anchor = self.leader(0).await?;

        for index in 0..leaders {
            let slots = match self.leader_node_id(index).await {
                Ok(id) => self.inspector.count_slots_owned_by(&anchor, &id).await.ok(),
                Err(e) => {
                    debug!(index, error = %e, "Could not resolve leader node id");
                    None
                }
            };
            if slots.unwrap_or(0) == 0 {
                info!(index, "Found empty leader");
                return self.rebalance_empty_masters_if_stable().await;
            }
        }
        Ok(Outcome::Skipped)
    }

    /// Whether leader pod `shard` is currently a master.
    pub async fn verify_leader(&self, shard: i32) -> Result<bool> {
        let node = self.leader(shard).await?;
        Ok(self.inspector.is_master(&node).await)
    }

    /// CLUSTER FAILOVER on leader pod `shard`.
    #[instrument(skip(self), fields(name = %self.addressing.name()))]
    pub async fn cluster_failover(&self, shard: i32) -> Result<Outcome> {
        let node = self.leader(shard).await?;
        info!(pod = %node.pod_name, "Promoting replica with CLUSTER FAILOVER");
        self.execute(&node, ClusterCommand::Failover).await?;
        Ok(Outcome::Executed)
    }

    /// `redis-cli --cluster check` on leader-0 reports three `[OK]` lines.
    pub async fn check_health(&self) -> Result<bool> {
        let anchor = self.leader(0).await?;
        let output = self
            .execute(
                &anchor,
                ClusterCommand::Check {
                    port: self.addressing.port(),
                },
            )
            .await?;
        Ok(output.stdout.matches("[OK]").count() == HEALTHY_CHECK_MARKERS)
    }

    /// CLUSTER MEET every failed or disconnected master at its pod's current
    /// IP. Keeps going past individual failures and reports the last one.
    /// Masters without an announced hostname cannot be traced to a pod and
    /// are left alone.
    #[instrument(skip(self), fields(name = %self.addressing.name()))]
    pub async fn repair_disconnected_masters(&self) -> Result<usize> {
        let anchor = self.leader(0).await?;
        let snapshot = self.inspector.cluster_nodes(&anchor).await?;

        let mut repaired = 0;
        let mut last_error = None;
        for master in snapshot.failed_masters() {
            // Only DNS-addressed nodes announce a hostname to map back to a pod
            let Some(host) = master.hostname.as_deref() else {
                debug!(node_id = %master.node_id, "Failed master announces no hostname, skipping repair");
                continue;
            };
            let pod = host.split('.').next().unwrap_or(host);

            let result = match self.inspector.pod_ip(pod).await {
                Ok(ip) => {
                    info!(pod, ip = %ip, "Re-meeting disconnected master");
                    self.execute(
                        &anchor,
                        ClusterCommand::Meet {
                            ip,
                            port: self.addressing.port(),
                        },
                    )
                    .await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(_) => repaired += 1,
                Err(e) => {
                    warn!(pod, error = %e, "Failed to repair master");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(repaired),
        }
    }

    /// Run one planned operation.
    pub async fn apply(&self, operation: PlannedOperation) -> Result<Outcome> {
        match operation {
            PlannedOperation::CreateCluster => self.create_cluster().await,
            PlannedOperation::AttachFollowers => Ok(match self.attach_followers().await? {
                0 => Outcome::Skipped,
                _ => Outcome::Executed,
            }),
            PlannedOperation::AddLeader { index } => self.add_leader(index).await,
            PlannedOperation::PromoteIfReplica { shard } => {
                if self.verify_leader(shard).await? {
                    Ok(Outcome::Skipped)
                } else {
                    self.cluster_failover(shard).await
                }
            }
            PlannedOperation::Reshard { shard, to } => self.reshard_shard(shard, to).await,
            PlannedOperation::RemoveReplicas { shard } => {
                let leader_id = self.leader_node_id(shard).await?;
                Ok(match self.remove_attached_replicas(&leader_id).await? {
                    0 => Outcome::Skipped,
                    _ => Outcome::Executed,
                })
            }
            PlannedOperation::RemoveLeader { shard } => {
                let node_id = self.leader_node_id(shard).await?;
                self.remove_node(&node_id).await
            }
            PlannedOperation::Rebalance => self.rebalance(false).await,
            PlannedOperation::RebalanceEmptyMasters => {
                self.rebalance_empty_masters_if_stable().await
            }
            PlannedOperation::CheckEmptyMasters => self.check_if_empty_masters().await,
            PlannedOperation::RepairDisconnectedMasters => {
                Ok(match self.repair_disconnected_masters().await? {
                    0 => Outcome::Skipped,
                    _ => Outcome::Executed,
                })
            }
        }
    }

    /// Run a plan in order, stopping at the first failure. Later steps
    /// depend on the effect of earlier ones, so nothing runs past an error.
    pub async fn execute_plan(&self, plan: &ScalingPlan) -> ConvergeReport {
        let mut report = ConvergeReport::new(plan.state);
        for operation in &plan.operations {
            match self.apply(*operation).await {
                Ok(Outcome::Executed) => report.executed.push(*operation),
                Ok(Outcome::Skipped) => report.skipped.push(*operation),
                Err(e) => {
                    warn!(operation = %operation, error = %e, "Cluster operation failed, stopping this pass");
                    report.failure = Some((*operation, e));
                    break;
                }
            }
        }
        report
    }

    /// Observe, plan and execute one pass.
    #[instrument(skip(self), fields(name = %self.addressing.name(), namespace = %self.addressing.namespace()))]
    pub async fn converge(&self, leader_statefulset_replicas: i32) -> Result<ConvergeReport> {
        let observation = self.observe(leader_statefulset_replicas).await?;
        let plan = plan(&observation);
        debug!(state = %plan.state, operations = plan.operations.len(), "Planned cluster pass");
        Ok(self.execute_plan(&plan).await)
    }
}

/// A pod is in the cluster when a node announces its IP or its hostname.
fn node_present(snapshot: &ClusterTopologySnapshot, pod_name: &str, ip: &str) -> bool {
    snapshot.contains_host(ip)
        || snapshot.nodes.iter().any(|n| {
            n.hostname.as_deref().is_some_and(|h| {
                h == pod_name
                    || h.strip_prefix(pod_name)
                        .is_some_and(|rest| rest.starts_with('.'))
            })
        })
}
