//! Names, labels and owner references shared by every generated resource.
//!
//! Each custom resource is rendered into one or more [`Workload`]s (one per
//! StatefulSet). A workload carries everything the StatefulSet and Service
//! generators need, so they never look at the custom resource itself.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::crd::{
    ClusterRole, KubernetesConfig, Redis, RedisCluster, RedisExporter, RedisReplication,
    RedisSentinel, SENTINEL_PORT, StorageSpec, TlsConfig,
};

/// Value of `app.kubernetes.io/managed-by` on everything the operator owns.
pub const MANAGED_BY: &str = "redis-operator";

pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// What a StatefulSet runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Standalone,
    ClusterLeader,
    ClusterFollower,
    Replication,
    Sentinel,
}

impl WorkloadKind {
    /// `app.kubernetes.io/component` value.
    pub fn component(&self) -> &'static str {
        match self {
            WorkloadKind::Standalone => "standalone",
            WorkloadKind::ClusterLeader => ClusterRole::Leader.suffix(),
            WorkloadKind::ClusterFollower => ClusterRole::Follower.suffix(),
            WorkloadKind::Replication => "replication",
            WorkloadKind::Sentinel => "sentinel",
        }
    }

    pub fn is_cluster(&self) -> bool {
        matches!(
            self,
            WorkloadKind::ClusterLeader | WorkloadKind::ClusterFollower
        )
    }
}

/// Explicit service settings, taken from the custom resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub service_type: String,
    pub exporter_enabled: bool,
}

impl ServiceConfig {
    pub fn new(kubernetes_config: &KubernetesConfig, exporter: Option<&RedisExporter>) -> Self {
        Self {
            service_type: kubernetes_config.service.service_type.clone(),
            exporter_enabled: exporter.is_some_and(|e| e.enabled),
        }
    }
}

/// One StatefulSet and its Services.
#[derive(Debug, Clone)]
pub struct Workload {
    /// Owning custom resource name.
    pub cr_name: String,
    /// StatefulSet name; also the client Service and container name.
    pub name: String,
    pub namespace: Option<String>,
    pub kind: WorkloadKind,
    pub replicas: i32,
    pub port: i32,
    pub kubernetes_config: KubernetesConfig,
    pub exporter: Option<RedisExporter>,
    pub storage: Option<StorageSpec>,
    pub tls: Option<TlsConfig>,
    pub owner: OwnerReference,
    /// Cluster pods announce their DNS name instead of their IP.
    pub announce_hostname: bool,
}

impl Workload {
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig::new(&self.kubernetes_config, self.exporter.as_ref())
    }

    pub fn headless_service_name(&self) -> String {
        headless_service_name(&self.name)
    }

    /// Labels on the StatefulSet, its pods and Services.
    pub fn labels(&self) -> BTreeMap<String, String> {
        standard_labels(&self.cr_name, &self.name, self.kind)
    }

    /// Stable selector for the StatefulSet's pods.
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        pod_selector_labels(&self.name, self.kind)
    }

    /// Standalone Redis.
    pub fn standalone(resource: &Redis) -> Self {
        let spec = &resource.spec;
        Self {
            cr_name: resource.name_any(),
            name: resource.name_any(),
            namespace: resource.namespace(),
            kind: WorkloadKind::Standalone,
            replicas: 1,
            port: spec.port,
            kubernetes_config: spec.kubernetes_config.clone(),
            exporter: Some(spec.redis_exporter.clone()),
            storage: Some(spec.storage.clone()),
            tls: spec.tls.clone(),
            owner: owner_reference(resource),
            announce_hostname: false,
        }
    }

    /// Leader or follower StatefulSet of a cluster.
    pub fn cluster(resource: &RedisCluster, role: ClusterRole) -> Self {
        let spec = &resource.spec;
        Self {
            cr_name: resource.name_any(),
            name: format!("{}-{}", resource.name_any(), role.suffix()),
            namespace: resource.namespace(),
            kind: match role {
                ClusterRole::Leader => WorkloadKind::ClusterLeader,
                ClusterRole::Follower => WorkloadKind::ClusterFollower,
            },
            replicas: spec.replicas_for(role),
            port: spec.port,
            kubernetes_config: spec.kubernetes_config.clone(),
            exporter: Some(spec.redis_exporter.clone()),
            storage: Some(spec.storage.clone()),
            tls: spec.tls.clone(),
            owner: owner_reference(resource),
            announce_hostname: spec.uses_hostnames(),
        }
    }

    pub fn replication(resource: &RedisReplication) -> Self {
        let spec = &resource.spec;
        Self {
            cr_name: resource.name_any(),
            name: resource.name_any(),
            namespace: resource.namespace(),
            kind: WorkloadKind::Replication,
            replicas: spec.cluster_size,
            port: spec.port,
            kubernetes_config: spec.kubernetes_config.clone(),
            exporter: Some(spec.redis_exporter.clone()),
            storage: Some(spec.storage.clone()),
            tls: spec.tls.clone(),
            owner: owner_reference(resource),
            announce_hostname: false,
        }
    }

    pub fn sentinel(resource: &RedisSentinel) -> Self {
        let spec = &resource.spec;
        Self {
            cr_name: resource.name_any(),
            name: sentinel_statefulset_name(&resource.name_any()),
            namespace: resource.namespace(),
            kind: WorkloadKind::Sentinel,
            replicas: spec.cluster_size,
            port: SENTINEL_PORT,
            kubernetes_config: spec.kubernetes_config.clone(),
            exporter: None,
            storage: None,
            tls: spec.tls.clone(),
            owner: owner_reference(resource),
            announce_hostname: false,
        }
    }
}

pub fn headless_service_name(statefulset_name: &str) -> String {
    format!("{}-headless", statefulset_name)
}

pub fn sentinel_statefulset_name(cr_name: &str) -> String {
    format!("{}-sentinel", cr_name)
}

/// Standard labels applied to all managed resources.
pub fn standard_labels(
    cr_name: &str,
    statefulset_name: &str,
    kind: WorkloadKind,
) -> BTreeMap<String, String> {
    let mut labels = pod_selector_labels(statefulset_name, kind);
    labels.insert(NAME_LABEL.to_string(), cr_name.to_string());
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    labels
}

/// Labels that select exactly the pods of one StatefulSet.
pub fn pod_selector_labels(statefulset_name: &str, kind: WorkloadKind) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(INSTANCE_LABEL.to_string(), statefulset_name.to_string());
    labels.insert(COMPONENT_LABEL.to_string(), kind.component().to_string());
    labels
}

/// `k=v,k=v` form accepted by list calls.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Controller owner reference for any of the Redis custom resources.
pub fn owner_reference<K>(resource: &K) -> OwnerReference
where
    K: Resource<DynamicType = ()>,
{
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: resource.name_any(),
        uid: resource.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}
