//! Reconciliation loop for RedisReplication.
//!
//! One StatefulSet of plain Redis pods. Each pass resolves the real master,
//! points stray masters back at it and refreshes the `redis-role` labels
//! the master and replica Services select on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::{Api, ResourceExt, runtime::controller::Action};
use tracing::{debug, error, info, warn};

use crate::controller::common::{
    FINALIZER, add_finalizer, apply_service, apply_workload, connection_params, finalize,
    statefulset_replicas,
};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::status::patch_status;
use crate::crd::{RedisReplication, RedisReplicationStatus, ResourceState};
use crate::replication::{ReplicationManager, ReplicationReport, RoleLabel, label_replication_pods};
use crate::resources::services::generate_role_service;
use crate::resources::{Workload, label_selector};
use crate::topology::{LiveInspector, NativeExecutor};

/// Reconcile a RedisReplication
pub async fn reconcile(obj: Arc<RedisReplication>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling RedisReplication");

    let api: Api<RedisReplication> = Api::namespaced(ctx.client.clone(), &namespace);
    let workload = Workload::replication(&obj);

    if obj.metadata.deletion_timestamp.is_some() {
        return finalize(&ctx.client, &api, &name, &[workload]).await;
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
        update_status(&api, &obj, ResourceState::Failed, &e.to_string(), None).await?;
        return Err(e);
    }

    apply_workload(&ctx.client, &workload).await?;
    let config = workload.service_config();
    for role in [RoleLabel::Master, RoleLabel::Slave] {
        apply_service(&ctx.client, &namespace, &generate_role_service(&workload, &config, role))
            .await?;
    }

    let (_, ready) = statefulset_replicas(&ctx.client, &namespace, &workload.name).await?;
    if ready < obj.spec.cluster_size {
        debug!(name = %name, ready, "Waiting for replication pods");
        update_status(
            &api,
            &obj,
            ResourceState::Initializing,
            "Waiting for pods to become ready",
            None,
        )
        .await?;
        return Ok(Action::requeue(Duration::from_secs(10)));
    }

    let params = connection_params(
        &ctx.client,
        &namespace,
        &name,
        obj.spec.port,
        None,
        &obj.spec.kubernetes_config,
        obj.spec.tls.as_ref(),
    )
    .await?;
    let connector = params.connector();
    let manager = ReplicationManager::new(
        NativeExecutor::new(connector.clone()),
        LiveInspector::new(ctx.client.clone(), &namespace, connector),
        params.addressing(),
        obj.spec.cluster_size,
    );

    let report = manager.reconcile_topology().await;
    let (state, reason, master) = match &report {
        Ok(report) => {
            record_report(&ctx, &obj, report);
            if !report.repointed.is_empty() {
                ctx.publish_normal_event(
                    &*obj,
                    "MasterRepaired",
                    "Reconciling",
                    Some(format!(
                        "Pointed {} at {}",
                        report.repointed.join(", "),
                        report.master().unwrap_or_default()
                    )),
                )
                .await;
            }
            assess(report)
        }
        Err(e) => {
            warn!(name = %name, error = %e, "Failed to reconcile replication topology");
            (ResourceState::Bootstrap, e.to_string(), None)
        }
    };

    if let Ok(report) = &report {
        let selector = label_selector(&workload.selector_labels());
        if let Err(e) =
            label_replication_pods(&ctx.client, &namespace, &selector, &report.assignment).await
        {
            warn!(name = %name, error = %e, "Failed to update role labels");
        }
    }

    update_status(&api, &obj, state, &reason, master).await?;

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_reconcile(
            "RedisReplication",
            &namespace,
            &name,
            start_time.elapsed().as_secs_f64(),
        );
    }

    let requeue = if state == ResourceState::Ready {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(10)
    };
    Ok(Action::requeue(requeue))
}

/// Validate the resource spec
fn validate_spec(obj: &RedisReplication) -> Result<()> {
    if obj.spec.cluster_size < 1 {
        return Err(Error::Validation("clusterSize must be at least 1".to_string()));
    }
    if !(1..=65535).contains(&obj.spec.port) {
        return Err(Error::Validation(format!("port {} out of range", obj.spec.port)));
    }
    Ok(())
}

/// Lifecycle state, reason and master pod for a replication pass.
fn assess(report: &ReplicationReport) -> (ResourceState, String, Option<String>) {
    let master = report.master().map(str::to_string);
    match &master {
        None => (
            ResourceState::Bootstrap,
            "No pod reports itself as master".to_string(),
            None,
        ),
        Some(_) if !report.failed.is_empty() => (
            ResourceState::Bootstrap,
            format!("Could not repoint {}", report.failed.join(", ")),
            master,
        ),
        Some(pod) => (ResourceState::Ready, format!("Master is {}", pod), master),
    }
}

fn record_report(ctx: &Context, obj: &RedisReplication, report: &ReplicationReport) {
    let Some(ref health_state) = ctx.health_state else {
        return;
    };
    let master = report.master();
    let connected = master
        .and_then(|m| report.assignment.attached.get(m))
        .map(|replicas| u32::try_from(replicas.len()).unwrap_or(u32::MAX))
        .unwrap_or(0);
    let previous = obj.status.as_ref().and_then(|s| s.master_node.as_deref());
    let changed = previous.is_some() && master.is_some() && previous != master;

    health_state.metrics.record_replication(
        &obj.namespace().unwrap_or_default(),
        &obj.name_any(),
        master.is_some(),
        connected,
        changed,
    );
}

async fn update_status(
    api: &Api<RedisReplication>,
    obj: &RedisReplication,
    state: ResourceState,
    reason: &str,
    master_node: Option<String>,
) -> Result<()> {
    let previous = obj.status.clone().unwrap_or_default();
    let status = RedisReplicationStatus {
        state,
        reason: reason.to_string(),
        master_node: master_node.or(previous.master_node),
        observed_generation: obj.metadata.generation,
    };
    patch_status(api, &obj.name_any(), &status).await
}
