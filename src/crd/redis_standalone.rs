//! Redis (standalone) Custom Resource Definition.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{
    DEFAULT_REDIS_PORT, KubernetesConfig, RedisExporter, ResourceState, StorageSpec, TlsConfig,
};

/// A single Redis server.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "redisoperator.smoketurner.com",
    version = "v1alpha1",
    kind = "Redis",
    plural = "redis",
    shortname = "rd",
    status = "RedisStatus",
    namespaced,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisSpec {
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

impl Default for RedisSpec {
    fn default() -> Self {
        Self {
            port: default_port(),
            kubernetes_config: KubernetesConfig::default(),
            redis_exporter: RedisExporter::default(),
            storage: StorageSpec::default(),
            tls: None,
        }
    }
}

fn default_port() -> i32 {
    DEFAULT_REDIS_PORT
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisStatus {
    #[serde(default)]
    pub state: ResourceState,

    #[serde(default)]
    pub reason: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
