//! RedisCluster Custom Resource Definition.
//!
//! A sharded Redis Cluster made of two StatefulSets: leaders owning the
//! 16384 hash slots and followers replicating from them.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{
    Condition, DEFAULT_REDIS_PORT, KubernetesConfig, RedisExporter, ResourceState, StorageSpec,
    TlsConfig,
};

/// RedisCluster deploys a leader/follower Redis Cluster.
///
/// Example:
/// ```yaml
/// apiVersion: redisoperator.smoketurner.com/v1alpha1
/// kind: RedisCluster
/// metadata:
///   name: orders
/// spec:
///   clusterSize: 3
///   clusterVersion: v7
///   kubernetesConfig:
///     existingPasswordSecret:
///       name: redis-auth
///       key: password
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "redisoperator.smoketurner.com",
    version = "v1alpha1",
    kind = "RedisCluster",
    plural = "redisclusters",
    shortname = "rc",
    status = "RedisClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Size", "type":"integer", "jsonPath":".spec.clusterSize"}"#,
    printcolumn = r#"{"name":"Leaders", "type":"integer", "jsonPath":".status.readyLeaderReplicas"}"#,
    printcolumn = r#"{"name":"Followers", "type":"integer", "jsonPath":".status.readyFollowerReplicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisClusterSpec {
    /// Number of shards. Used for both roles unless a role overrides it.
    #[serde(default = "default_cluster_size")]
    pub cluster_size: i32,

    /// Redis major version. `v7` switches node addressing to pod DNS names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_version: Option<String>,

    /// Redis data port (default: 6379).
    #[serde(default = "default_port")]
    pub port: i32,

    #[serde(default)]
    pub kubernetes_config: KubernetesConfig,

    /// Leader StatefulSet overrides.
    #[serde(default)]
    pub redis_leader: RoleSpec,

    /// Follower StatefulSet overrides.
    #[serde(default)]
    pub redis_follower: RoleSpec,

    #[serde(default)]
    pub redis_exporter: RedisExporter,

    #[serde(default)]
    pub storage: StorageSpec,

    /// TLS for client and cluster bus traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

impl Default for RedisClusterSpec {
    fn default() -> Self {
        Self {
            cluster_size: default_cluster_size(),
            cluster_version: None,
            port: default_port(),
            kubernetes_config: KubernetesConfig::default(),
            redis_leader: RoleSpec::default(),
            redis_follower: RoleSpec::default(),
            redis_exporter: RedisExporter::default(),
            storage: StorageSpec::default(),
            tls: None,
        }
    }
}

fn default_cluster_size() -> i32 {
    3
}

fn default_port() -> i32 {
    DEFAULT_REDIS_PORT
}

/// Per-role overrides for the leader or follower StatefulSet.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    /// Replica count for this role. Falls back to `clusterSize`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

/// Role of a StatefulSet inside a RedisCluster.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ClusterRole {
    Leader,
    Follower,
}

impl ClusterRole {
    /// Suffix used in StatefulSet, Service and pod names.
    pub fn suffix(&self) -> &'static str {
        match self {
            ClusterRole::Leader => "leader",
            ClusterRole::Follower => "follower",
        }
    }

    /// Substring of the `CLUSTER NODES` flags field identifying this role.
    pub fn node_flag(&self) -> &'static str {
        match self {
            ClusterRole::Leader => "master",
            ClusterRole::Follower => "slave",
        }
    }
}

impl std::fmt::Display for ClusterRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.suffix())
    }
}

impl RedisClusterSpec {
    /// Desired replica count for a role.
    pub fn replicas_for(&self, role: ClusterRole) -> i32 {
        let overridden = match role {
            ClusterRole::Leader => self.redis_leader.replicas,
            ClusterRole::Follower => self.redis_follower.replicas,
        };
        overridden.unwrap_or(self.cluster_size)
    }

    /// Desired leader (shard) count.
    pub fn leader_replicas(&self) -> i32 {
        self.replicas_for(ClusterRole::Leader)
    }

    /// Desired follower count.
    pub fn follower_replicas(&self) -> i32 {
        self.replicas_for(ClusterRole::Follower)
    }

    /// Total number of Redis nodes across both roles.
    pub fn total_nodes(&self) -> i32 {
        self.leader_replicas() + self.follower_replicas()
    }

    /// Whether the declared version opts into hostname-based addressing.
    pub fn uses_hostnames(&self) -> bool {
        self.cluster_version.as_deref() == Some("v7")
    }
}

/// Convergence state of the live cluster topology.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum TopologyState {
    /// No cluster formed yet.
    #[default]
    Uninitialized,
    /// Cluster create or first slot assignment in flight.
    Bootstrapping,
    /// Slots fully assigned and node count matches the desired size.
    Stable,
    /// Nodes being added, attached or rebalanced.
    ScalingUp,
    /// Slots being moved away from departing leaders.
    ScalingDown,
    /// Failed or disconnected nodes present.
    Degraded,
}

impl std::fmt::Display for TopologyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyState::Uninitialized => write!(f, "Uninitialized"),
            TopologyState::Bootstrapping => write!(f, "Bootstrapping"),
            TopologyState::Stable => write!(f, "Stable"),
            TopologyState::ScalingUp => write!(f, "ScalingUp"),
            TopologyState::ScalingDown => write!(f, "ScalingDown"),
            TopologyState::Degraded => write!(f, "Degraded"),
        }
    }
}

/// Status of a RedisCluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisClusterStatus {
    #[serde(default)]
    pub state: ResourceState,

    /// Human-readable reason for the current state.
    #[serde(default)]
    pub reason: String,

    #[serde(default)]
    pub ready_leader_replicas: i32,

    #[serde(default)]
    pub ready_follower_replicas: i32,

    /// Last topology state computed by the orchestrator.
    #[serde(default)]
    pub topology_state: TopologyState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}
