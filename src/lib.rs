//! redis-operator library crate
//!
//! Kubernetes operator for standalone Redis, replication groups, Sentinel
//! and Redis Cluster. This module wires the four controllers; the
//! orchestration core lives in `topology`, `replication` and `sentinel`.

pub mod client;
pub mod controller;
pub mod crd;
pub mod health;
pub mod replication;
pub mod resources;
pub mod sentinel;
pub mod topology;

pub use health::HealthState;

use std::future::Future;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::common::error_policy;
use controller::context::Context;
use controller::error::Error;
use controller::{
    cluster_reconciler, replication_reconciler, sentinel_reconciler, standalone_reconciler,
};
use crd::{Redis, RedisCluster, RedisReplication, RedisSentinel};

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Watcher configuration shared by all controllers.
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Reflector-backed stream of a resource type.
///
/// Retries with backoff, yields applied objects only and drops
/// status-only updates via the generation predicate.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

/// Run all four controllers cluster-wide.
///
/// If health_state is provided, metrics will be recorded for reconciliations.
pub async fn run_controller(client: Client, health_state: Option<Arc<HealthState>>) {
    run_controller_scoped(client, health_state, None).await
}

/// Run all four controllers, optionally scoped to one namespace.
pub async fn run_controller_scoped(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    namespace: Option<&str>,
) {
    info!(
        "Starting controllers for Redis resources (scope: {})",
        namespace.unwrap_or("cluster-wide")
    );

    // Mark as ready once we start the controllers
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(client.clone(), health_state));

    futures::join!(
        run_resource_controller::<RedisCluster, _, _>(
            client.clone(),
            ctx.clone(),
            namespace,
            cluster_reconciler::reconcile,
        ),
        run_resource_controller::<RedisReplication, _, _>(
            client.clone(),
            ctx.clone(),
            namespace,
            replication_reconciler::reconcile,
        ),
        run_resource_controller::<RedisSentinel, _, _>(
            client.clone(),
            ctx.clone(),
            namespace,
            sentinel_reconciler::reconcile,
        ),
        run_resource_controller::<Redis, _, _>(
            client,
            ctx,
            namespace,
            standalone_reconciler::reconcile,
        ),
    );

    // This should never complete in normal operation
    error!("Controller streams ended unexpectedly");
}

/// One controller: the custom resource plus the StatefulSets and Services
/// it owns.
async fn run_resource_controller<K, F, Fut>(
    client: Client,
    ctx: Arc<Context>,
    namespace: Option<&str>,
    reconcile: F,
) where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + std::fmt::Debug
        + Send
        + Sync
        + 'static,
    F: FnMut(Arc<K>, Arc<Context>) -> Fut,
    Fut: Future<Output = Result<Action, Error>> + Send + 'static,
{
    let kind = K::kind(&()).to_string();
    let resources: Api<K> = scoped_api(client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client, namespace);

    let watcher_config = default_watcher_config();
    let (reader, resource_stream) = create_filtered_stream(resources, watcher_config.clone());

    // StatefulSets are watched in full for readyReplicas; Services only need metadata
    Controller::for_stream(resource_stream, reader)
        .owns(statefulsets, watcher_config.clone())
        .owns_stream(metadata_watcher(services, watcher_config).touched_objects())
        .run(reconcile, error_policy::<K>, ctx)
        .for_each(|result| {
            let kind = kind.clone();
            async move {
                match result {
                    Ok((obj, _action)) => {
                        debug!(kind = %kind, "Reconciled: {}", obj.name);
                    }
                    Err(e) => {
                        // Watch events for owned objects can arrive after the owner is gone
                        let is_not_found = match &e {
                            kube::runtime::controller::Error::ObjectNotFound(_) => true,
                            kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                                err.is_not_found()
                            }
                            _ => false,
                        };
                        if is_not_found {
                            debug!(kind = %kind, "Object no longer exists (likely deleted): {:?}", e);
                        } else {
                            error!(kind = %kind, "Reconciliation error: {:?}", e);
                        }
                    }
                }
            }
        })
        .await;
}
