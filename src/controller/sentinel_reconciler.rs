//! Reconciliation loop for RedisSentinel.
//!
//! Runs the sentinel StatefulSet and points every sentinel at the master of
//! the referenced RedisReplication.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::{Api, Client, ResourceExt, runtime::controller::Action};
use tracing::{debug, error, info, warn};

use crate::controller::common::{
    FINALIZER, add_finalizer, apply_workload, connection_params, finalize, statefulset_replicas,
};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::status::patch_status;
use crate::crd::{
    RedisReplication, RedisSentinel, RedisSentinelConfig, RedisSentinelStatus, ResourceState,
    SENTINEL_PORT,
};
use crate::replication::ReplicationManager;
use crate::resources::{Workload, label_selector};
use crate::sentinel::{MonitorTarget, SentinelConfigurator};
use crate::topology::{ClusterInspector, LiveInspector, NativeExecutor};

/// Reconcile a RedisSentinel
pub async fn reconcile(obj: Arc<RedisSentinel>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling RedisSentinel");

    let api: Api<RedisSentinel> = Api::namespaced(ctx.client.clone(), &namespace);
    let workload = Workload::sentinel(&obj);

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

    let (_, ready) = statefulset_replicas(&ctx.client, &namespace, &workload.name).await?;
    if ready < obj.spec.cluster_size {
        debug!(name = %name, ready, "Waiting for sentinel pods");
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

    let (state, reason, monitored) = match &obj.spec.redis_sentinel_config {
        Some(config) => monitor(&ctx, &obj, &workload, &namespace, config).await?,
        None => (
            ResourceState::Ready,
            "No replication group configured".to_string(),
            None,
        ),
    };

    update_status(&api, &obj, state, &reason, monitored).await?;

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_reconcile(
            "RedisSentinel",
            &namespace,
            &name,
            start_time.elapsed().as_secs_f64(),
        );
    }

    let requeue = if state == ResourceState::Ready {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(15)
    };
    Ok(Action::requeue(requeue))
}

/// Validate the resource spec
fn validate_spec(obj: &RedisSentinel) -> Result<()> {
    if obj.spec.cluster_size < 1 {
        return Err(Error::Validation("clusterSize must be at least 1".to_string()));
    }
    if let Some(config) = &obj.spec.redis_sentinel_config {
        if config.redis_replication_name.is_empty() {
            return Err(Error::Validation(
                "redisSentinelConfig.redisReplicationName is required".to_string(),
            ));
        }
        if config.quorum.parse::<u32>().map_or(true, |q| q == 0) {
            return Err(Error::Validation(format!(
                "quorum {:?} must be a positive number",
                config.quorum
            )));
        }
    }
    Ok(())
}

/// Resolve the replication master and configure the sentinels.
async fn monitor(
    ctx: &Context,
    obj: &RedisSentinel,
    workload: &Workload,
    namespace: &str,
    config: &RedisSentinelConfig,
) -> Result<(ResourceState, String, Option<String>)> {
    let replication_api: Api<RedisReplication> = Api::namespaced(ctx.client.clone(), namespace);
    let Some(replication) = replication_api
        .get_opt(&config.redis_replication_name)
        .await?
    else {
        return Ok((
            ResourceState::Initializing,
            format!(
                "Waiting for RedisReplication {}",
                config.redis_replication_name
            ),
            None,
        ));
    };

    let target = match resolve_target(&ctx.client, namespace, &replication, config).await? {
        Some(target) => target,
        None => {
            return Ok((
                ResourceState::Bootstrap,
                format!("No master resolved for {}", config.redis_replication_name),
                None,
            ));
        }
    };

    let sentinel_params = connection_params(
        &ctx.client,
        namespace,
        &workload.name,
        SENTINEL_PORT,
        None,
        &obj.spec.kubernetes_config,
        obj.spec.tls.as_ref(),
    )
    .await?;
    let configurator =
        SentinelConfigurator::new(ctx.client.clone(), namespace, sentinel_params.connector());
    let selector = label_selector(&workload.selector_labels());

    let previous = obj.status.as_ref().and_then(|s| s.monitored_master.as_deref());
    match configurator.configure_all(&selector, &target).await {
        Ok(configured) => {
            if previous != Some(target.address().as_str()) {
                ctx.publish_normal_event(
                    obj,
                    "MonitoringMaster",
                    "Configuring",
                    Some(format!("{} sentinels monitor {}", configured, target.address())),
                )
                .await;
            }
            Ok((
                ResourceState::Ready,
                format!("Monitoring {}", target.address()),
                Some(target.address()),
            ))
        }
        Err(e) => {
            warn!(name = %obj.name_any(), error = %e, "Failed to configure sentinels");
            Ok((ResourceState::Bootstrap, e.to_string(), None))
        }
    }
}

async fn resolve_target(
    client: &Client,
    namespace: &str,
    replication: &RedisReplication,
    config: &RedisSentinelConfig,
) -> Result<Option<MonitorTarget>> {
    let spec = &replication.spec;
    let params = connection_params(
        client,
        namespace,
        &replication.name_any(),
        spec.port,
        None,
        &spec.kubernetes_config,
        spec.tls.as_ref(),
    )
    .await?;
    let connector = params.connector();
    let manager = ReplicationManager::new(
        NativeExecutor::new(connector.clone()),
        LiveInspector::new(client.clone(), namespace, connector),
        params.addressing(),
        spec.cluster_size,
    );

    match manager.master_node().await {
        Ok(Some(master)) => {
            let mut target = MonitorTarget::new(config, &master, params.password);
            // Sentinels resolving hostnames report the master by IP
            if config.resolves_hostnames() {
                match manager.inspector().pod_ip(&master.pod_name).await {
                    Ok(ip) => target = target.with_alias(ip),
                    Err(e) => debug!(pod = %master.pod_name, error = %e, "Master pod IP unknown"),
                }
            }
            Ok(Some(target))
        }
        Ok(None) => Ok(None),
        Err(e) => {
            warn!(replication = %replication.name_any(), error = %e, "Failed to resolve master");
            Ok(None)
        }
    }
}

async fn update_status(
    api: &Api<RedisSentinel>,
    obj: &RedisSentinel,
    state: ResourceState,
    reason: &str,
    monitored_master: Option<String>,
) -> Result<()> {
    let previous = obj.status.clone().unwrap_or_default();
    let status = RedisSentinelStatus {
        state,
        reason: reason.to_string(),
        monitored_master: monitored_master.or(previous.monitored_master),
        observed_generation: obj.metadata.generation,
    };
    patch_status(api, &obj.name_any(), &status).await
}
