//! RedisSentinel Custom Resource Definition.
//!
//! Sentinel processes watching the master of a RedisReplication.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{KubernetesConfig, ResourceState, TlsConfig};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "redisoperator.smoketurner.com",
    version = "v1alpha1",
    kind = "RedisSentinel",
    plural = "redissentinels",
    shortname = "rs",
    status = "RedisSentinelStatus",
    namespaced,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisSentinelSpec {
    /// Number of sentinel pods (default: 3).
    #[serde(default = "default_cluster_size")]
    pub cluster_size: i32,

    #[serde(default)]
    pub kubernetes_config: KubernetesConfig,

    /// Monitoring target. Sentinels start unconfigured when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_sentinel_config: Option<RedisSentinelConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

impl Default for RedisSentinelSpec {
    fn default() -> Self {
        Self {
            cluster_size: default_cluster_size(),
            kubernetes_config: KubernetesConfig::default(),
            redis_sentinel_config: None,
            tls: None,
        }
    }
}

fn default_cluster_size() -> i32 {
    3
}

/// Which replication group the sentinels monitor and how.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisSentinelConfig {
    /// Name of the RedisReplication in the same namespace.
    pub redis_replication_name: String,

    /// Sentinel master group name (default: myMaster).
    #[serde(default = "default_master_group_name")]
    pub master_group_name: String,

    /// Sentinels that must agree before failover (default: 2).
    #[serde(default = "default_quorum")]
    pub quorum: String,

    /// "yes" monitors the master by DNS name instead of pod IP.
    #[serde(default = "default_resolve_hostnames")]
    pub resolve_hostnames: String,
}

fn default_master_group_name() -> String {
    "myMaster".to_string()
}

fn default_quorum() -> String {
    "2".to_string()
}

fn default_resolve_hostnames() -> String {
    "no".to_string()
}

impl RedisSentinelConfig {
    pub fn resolves_hostnames(&self) -> bool {
        self.resolve_hostnames.eq_ignore_ascii_case("yes")
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisSentinelStatus {
    #[serde(default)]
    pub state: ResourceState,

    #[serde(default)]
    pub reason: String,

    /// Address sentinels were last pointed at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitored_master: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
