//! RedisReplication Custom Resource Definition.
//!
//! One master and N-1 asynchronous replicas in a single StatefulSet.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{
    DEFAULT_REDIS_PORT, KubernetesConfig, RedisExporter, ResourceState, StorageSpec, TlsConfig,
};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "redisoperator.smoketurner.com",
    version = "v1alpha1",
    kind = "RedisReplication",
    plural = "redisreplications",
    shortname = "rr",
    status = "RedisReplicationStatus",
    namespaced,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Master", "type":"string", "jsonPath":".status.masterNode"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisReplicationSpec {
    /// Total pods, master included (default: 3).
    #[serde(default = "default_cluster_size")]
    pub cluster_size: i32,

    #[serde(default = "default_port")]
    pub port: i32,

    #[serde(default)]
    pub kubernetes_config: KubernetesConfig,

    #[serde(default)]
    pub redis_exporter: RedisExporter,

    #[serde(default)]
    pub storage: StorageSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

impl Default for RedisReplicationSpec {
    fn default() -> Self {
        Self {
            cluster_size: default_cluster_size(),
            port: default_port(),
            kubernetes_config: KubernetesConfig::default(),
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

/// Status of a RedisReplication.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisReplicationStatus {
    #[serde(default)]
    pub state: ResourceState,

    #[serde(default)]
    pub reason: String,

    /// Pod currently acting as the real master.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_node: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
