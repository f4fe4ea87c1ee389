//! Reconciliation loop for RedisCluster.
//!
//! Applies the leader and follower StatefulSets, then drives the live
//! cluster with the topology orchestrator. Scale-down runs before the
//! leader StatefulSet is shrunk so departing pods still exist while their
//! slots are moved away.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::{Api, Client, ResourceExt, runtime::controller::Action};
use tracing::{debug, error, info, warn};

use crate::controller::common::{
    FINALIZER, add_finalizer, apply_workload, connection_params, finalize, statefulset_replicas,
};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::status::{carry_transition_times, conditions_for, patch_status};
use crate::crd::{
    ClusterRole, RedisCluster, RedisClusterStatus, ResourceState, TopologyState,
};
use crate::replication::label_cluster_pods;
use crate::resources::{Workload, label_selector};
use crate::topology::{
    ConnectionParams, ConvergeReport, LiveInspector, NativeExecutor, PodExecutor, RoutingExecutor,
    TopologyOrchestrator,
};

type LiveOrchestrator = TopologyOrchestrator<RoutingExecutor, LiveInspector>;

/// Operation kinds counted in metrics.
const COUNTED_OPERATIONS: [&str; 4] = ["reshard", "rebalance", "add-node", "remove-followers"];

/// Reconcile a RedisCluster
pub async fn reconcile(obj: Arc<RedisCluster>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling RedisCluster");

    let api: Api<RedisCluster> = Api::namespaced(ctx.client.clone(), &namespace);

    if obj.metadata.deletion_timestamp.is_some() {
        let workloads = [
            Workload::cluster(&obj, ClusterRole::Leader),
            Workload::cluster(&obj, ClusterRole::Follower),
        ];
        return finalize(&ctx.client, &api, &name, &workloads).await;
    }

    if !obj.finalizers().iter().any(|f| f == FINALIZER) {
        info!(name = %name, "Adding finalizer");
        add_finalizer(&api, &name, FINALIZER).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    if let Err(e) = validate_spec(&obj) {
        error!(name = %name, error = %e, "Validation failed");
        ctx.publish_warning_event(&*obj, "ValidationFailed", "Validating", Some(e.to_string()))
            .await;
        update_status(&api, &obj, StatusUpdate::new(ResourceState::Failed, &e.to_string())).await?;
        return Err(e);
    }

    let pass = ClusterPass::new(&obj, &ctx.client, &namespace).await?;
    let (action, update) = pass.run(&ctx).await?;
    update_status(&api, &obj, update).await?;

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_reconcile(
            "RedisCluster",
            &namespace,
            &name,
            start_time.elapsed().as_secs_f64(),
        );
    }

    Ok(action)
}

/// Validate the resource spec
fn validate_spec(obj: &RedisCluster) -> Result<()> {
    let spec = &obj.spec;
    if spec.leader_replicas() < 1 {
        return Err(Error::Validation("at least one leader is required".to_string()));
    }
    if spec.leader_replicas() == 2 {
        return Err(Error::Validation(
            "a cluster needs one leader or at least three".to_string(),
        ));
    }
    if spec.follower_replicas() < 0 {
        return Err(Error::Validation("follower replicas cannot be negative".to_string()));
    }
    if !(1..=65535).contains(&spec.port) {
        return Err(Error::Validation(format!("port {} out of range", spec.port)));
    }
    if spec
        .kubernetes_config
        .existing_password_secret
        .as_ref()
        .is_some_and(|s| s.name.is_empty() || s.key.is_empty())
    {
        return Err(Error::Validation(
            "existingPasswordSecret needs both name and key".to_string(),
        ));
    }
    Ok(())
}

/// What one pass decided to write to status.
struct StatusUpdate {
    state: ResourceState,
    reason: String,
    topology_state: Option<TopologyState>,
    ready_leaders: Option<i32>,
    ready_followers: Option<i32>,
}

impl StatusUpdate {
    fn new(state: ResourceState, reason: &str) -> Self {
        Self {
            state,
            reason: reason.to_string(),
            topology_state: None,
            ready_leaders: None,
            ready_followers: None,
        }
    }

    fn replicas(mut self, leaders: i32, followers: i32) -> Self {
        self.ready_leaders = Some(leaders);
        self.ready_followers = Some(followers);
        self
    }

    fn topology(mut self, state: TopologyState) -> Self {
        self.topology_state = Some(state);
        self
    }
}

/// Everything one reconcile pass of a RedisCluster works with.
struct ClusterPass<'a> {
    obj: &'a RedisCluster,
    client: &'a Client,
    namespace: &'a str,
    leader: Workload,
    follower: Workload,
    params: ConnectionParams,
}

impl<'a> ClusterPass<'a> {
    async fn new(obj: &'a RedisCluster, client: &'a Client, namespace: &'a str) -> Result<Self> {
        let spec = &obj.spec;
        let params = connection_params(
            client,
            namespace,
            &obj.name_any(),
            spec.port,
            spec.cluster_version.as_deref(),
            &spec.kubernetes_config,
            spec.tls.as_ref(),
        )
        .await?;
        Ok(Self {
            obj,
            client,
            namespace,
            leader: Workload::cluster(obj, ClusterRole::Leader),
            follower: Workload::cluster(obj, ClusterRole::Follower),
            params,
        })
    }

    fn orchestrator(&self) -> LiveOrchestrator {
        let connector = self.params.connector();
        let executor = RoutingExecutor::new(
            PodExecutor::new(
                self.client.clone(),
                self.namespace,
                &self.params.name,
                self.params.cli_auth(),
            ),
            NativeExecutor::new(connector.clone()),
        );
        let inspector = LiveInspector::new(self.client.clone(), self.namespace, connector);
        TopologyOrchestrator::new(
            executor,
            inspector,
            self.params.addressing(),
            self.obj.spec.leader_replicas(),
            self.obj.spec.follower_replicas(),
        )
    }

    async fn run(&self, ctx: &Context) -> Result<(Action, StatusUpdate)> {
        let desired_leaders = self.obj.spec.leader_replicas();
        let desired_followers = self.obj.spec.follower_replicas();
        let orchestrator = self.orchestrator();

        // Departing leaders must hand over their slots while their pods exist
        let (current_leaders, _) =
            statefulset_replicas(self.client, self.namespace, &self.leader.name).await?;
        if current_leaders > desired_leaders {
            info!(
                name = %self.params.name,
                current = current_leaders,
                desired = desired_leaders,
                "Scaling down cluster before shrinking leader StatefulSet"
            );
            let report = match orchestrator.converge(current_leaders).await {
                Ok(report) => report,
                Err(e) => {
                    warn!(name = %self.params.name, error = %e, "Could not observe cluster for scale-down");
                    return Ok(requeue_with(
                        StatusUpdate::new(ResourceState::Bootstrap, &e.to_string())
                            .topology(TopologyState::ScalingDown),
                        Duration::from_secs(30),
                    ));
                }
            };
            self.record_operations(ctx, &report);
            if let Some((operation, e)) = &report.failure {
                ctx.publish_warning_event(
                    self.obj,
                    "ScaleDownFailed",
                    "Scaling",
                    Some(format!("{}: {}", operation, e)),
                )
                .await;
                return Ok(requeue_with(
                    StatusUpdate::new(ResourceState::Bootstrap, &format!("{} failed: {}", operation, e))
                        .topology(report.state),
                    Duration::from_secs(30),
                ));
            }
            if !report.ran_to_completion() {
                return Ok(requeue_with(
                    StatusUpdate::new(
                        ResourceState::Bootstrap,
                        "Waiting for the declared leaders to join before scaling down",
                    )
                    .topology(report.state),
                    Duration::from_secs(10),
                ));
            }
            ctx.publish_normal_event(
                self.obj,
                "ScaledDown",
                "Scaling",
                Some(format!("Removed {} leader(s)", current_leaders - desired_leaders)),
            )
            .await;
        }

        apply_workload(self.client, &self.leader).await?;
        apply_workload(self.client, &self.follower).await?;

        let (_, ready_leaders) =
            statefulset_replicas(self.client, self.namespace, &self.leader.name).await?;
        let (_, ready_followers) =
            statefulset_replicas(self.client, self.namespace, &self.follower.name).await?;

        if ready_leaders < desired_leaders || ready_followers < desired_followers {
            debug!(
                name = %self.params.name,
                ready_leaders,
                ready_followers,
                "Waiting for cluster pods"
            );
            return Ok(requeue_with(
                StatusUpdate::new(ResourceState::Initializing, "Waiting for pods to become ready")
                    .replicas(ready_leaders, ready_followers),
                Duration::from_secs(10),
            ));
        }

        let report = match orchestrator.converge(desired_leaders).await {
            Ok(report) => report,
            Err(e) => {
                warn!(name = %self.params.name, error = %e, "Failed to observe cluster");
                return Ok(requeue_with(
                    StatusUpdate::new(ResourceState::Bootstrap, &e.to_string())
                        .replicas(ready_leaders, ready_followers),
                    Duration::from_secs(30),
                ));
            }
        };
        self.record_operations(ctx, &report);
        if !report.executed.is_empty() {
            let executed: Vec<String> = report.executed.iter().map(ToString::to_string).collect();
            ctx.publish_normal_event(
                self.obj,
                "TopologyChanged",
                "Reconciling",
                Some(executed.join(", ")),
            )
            .await;
        }

        let update = self
            .assess(ctx, &orchestrator, &report)
            .await
            .replicas(ready_leaders, ready_followers)
            .topology(report.state);

        self.label_roles(&orchestrator).await;

        let requeue = if update.state == ResourceState::Ready {
            Duration::from_secs(60)
        } else {
            Duration::from_secs(10)
        };
        Ok(requeue_with(update, requeue))
    }

    /// Decide the lifecycle state after a converge pass.
    async fn assess(
        &self,
        ctx: &Context,
        orchestrator: &LiveOrchestrator,
        report: &ConvergeReport,
    ) -> StatusUpdate {
        if let Some((operation, e)) = &report.failure {
            return StatusUpdate::new(ResourceState::Bootstrap, &format!("{} failed: {}", operation, e));
        }

        match orchestrator.check_cluster_state().await {
            Ok(0) => {}
            Ok(failed) => {
                warn!(name = %self.params.name, failed, "Cluster has failed or disconnected nodes");
                ctx.publish_warning_event(
                    self.obj,
                    "NodesFailed",
                    "Reconciling",
                    Some(format!("{} nodes failed or disconnected", failed)),
                )
                .await;
                self.set_healthy(ctx, false);
                return StatusUpdate::new(
                    ResourceState::Failed,
                    &format!("{} nodes failed or disconnected", failed),
                );
            }
            Err(e) => {
                warn!(name = %self.params.name, error = %e, "Failed to read cluster state");
                return StatusUpdate::new(ResourceState::Bootstrap, &e.to_string());
            }
        }

        let healthy = match orchestrator.check_health().await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!(name = %self.params.name, error = %e, "Cluster check failed");
                false
            }
        };
        self.set_healthy(ctx, healthy);

        if healthy && report.state == TopologyState::Stable {
            StatusUpdate::new(ResourceState::Ready, "Cluster is healthy")
        } else if healthy {
            StatusUpdate::new(ResourceState::Bootstrap, &format!("Cluster is {}", report.state))
        } else {
            StatusUpdate::new(ResourceState::Bootstrap, "Cluster check did not pass")
        }
    }

    async fn label_roles(&self, orchestrator: &LiveOrchestrator) {
        for workload in [&self.leader, &self.follower] {
            let selector = label_selector(&workload.selector_labels());
            if let Err(e) = label_cluster_pods(
                self.client,
                orchestrator.inspector(),
                orchestrator.addressing(),
                &selector,
            )
            .await
            {
                warn!(statefulset = %workload.name, error = %e, "Failed to update role labels");
            }
        }
    }

    fn record_operations(&self, ctx: &Context, report: &ConvergeReport) {
        let Some(ref health_state) = ctx.health_state else {
            return;
        };
        let attempted = report
            .executed
            .iter()
            .chain(report.failure.as_ref().map(|(op, _)| op));
        let mut counts = [0u64; COUNTED_OPERATIONS.len()];
        for operation in attempted {
            if let Some(i) = COUNTED_OPERATIONS.iter().position(|k| *k == operation.kind()) {
                if let Some(count) = counts.get_mut(i) {
                    *count += 1;
                }
            }
        }
        for (kind, count) in COUNTED_OPERATIONS.iter().zip(counts) {
            health_state
                .metrics
                .record_cluster_operation(self.namespace, &self.params.name, kind, count);
        }
    }

    fn set_healthy(&self, ctx: &Context, healthy: bool) {
        if let Some(ref health_state) = ctx.health_state {
            health_state
                .metrics
                .set_cluster_healthy(self.namespace, &self.params.name, healthy);
        }
    }
}

fn requeue_with(update: StatusUpdate, after: Duration) -> (Action, StatusUpdate) {
    (Action::requeue(after), update)
}

/// Write status, keeping fields this pass did not observe.
async fn update_status(api: &Api<RedisCluster>, obj: &RedisCluster, update: StatusUpdate) -> Result<()> {
    let previous = obj.status.clone().unwrap_or_default();
    let generation = obj.metadata.generation;

    let conditions = carry_transition_times(
        &previous.conditions,
        conditions_for(update.state, &update.reason, generation),
    );

    let status = RedisClusterStatus {
        state: update.state,
        reason: update.reason,
        ready_leader_replicas: update.ready_leaders.unwrap_or(previous.ready_leader_replicas),
        ready_follower_replicas: update
            .ready_followers
            .unwrap_or(previous.ready_follower_replicas),
        topology_state: update.topology_state.unwrap_or(previous.topology_state),
        observed_generation: generation,
        conditions,
    };

    patch_status(api, &obj.name_any(), &status).await
}
