//! Reconciliation loop for standalone Redis.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::{Api, ResourceExt, runtime::controller::Action};
use tracing::{debug, error, info};

use crate::controller::common::{
    FINALIZER, add_finalizer, apply_workload, finalize, statefulset_replicas,
};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::status::patch_status;
use crate::crd::{Redis, RedisStatus, ResourceState};
use crate::resources::Workload;

/// Reconcile a Redis
pub async fn reconcile(obj: Arc<Redis>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling Redis");

    let api: Api<Redis> = Api::namespaced(ctx.client.clone(), &namespace);
    let workload = Workload::standalone(&obj);

    if obj.metadata.deletion_timestamp.is_some() {
        return finalize(&ctx.client, &api, &name, &[workload]).await;
    }

    if !obj.finalizers().iter().any(|f| f == FINALIZER) {
        info!(name = %name, "Adding finalizer");
        add_finalizer(&api, &name, FINALIZER).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    if !(1..=65535).contains(&obj.spec.port) {
        let e = Error::Validation(format!("port {} out of range", obj.spec.port));
        error!(name = %name, error = %e, "Validation failed");
        ctx.publish_warning_event(&*obj, "ValidationFailed", "Validating", Some(e.to_string()))
            .await;
        update_status(&api, &obj, ResourceState::Failed, &e.to_string()).await?;
        return Err(e);
    }

    apply_workload(&ctx.client, &workload).await?;

    let (_, ready) = statefulset_replicas(&ctx.client, &namespace, &workload.name).await?;
    let (state, reason, requeue) = if ready >= 1 {
        (ResourceState::Ready, "Redis is running", Duration::from_secs(60))
    } else {
        (
            ResourceState::Initializing,
            "Waiting for pod to become ready",
            Duration::from_secs(10),
        )
    };

    let previous = obj.status.as_ref().map(|s| s.state);
    if state == ResourceState::Ready && previous != Some(ResourceState::Ready) {
        ctx.publish_normal_event(&*obj, "Ready", "Reconciling", None).await;
    }
    update_status(&api, &obj, state, reason).await?;

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_reconcile(
            "Redis",
            &namespace,
            &name,
            start_time.elapsed().as_secs_f64(),
        );
    }

    Ok(Action::requeue(requeue))
}

async fn update_status(
    api: &Api<Redis>,
    obj: &Redis,
    state: ResourceState,
    reason: &str,
) -> Result<()> {
    let status = RedisStatus {
        state,
        reason: reason.to_string(),
        observed_generation: obj.metadata.generation,
    };
    patch_status(api, &obj.name_any(), &status).await
}
