//! Spec and status types shared by every Redis custom resource.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default Redis data port.
pub const DEFAULT_REDIS_PORT: i32 = 6379;

/// Redis Cluster bus port offset (data port + 10000).
pub const CLUSTER_BUS_PORT_OFFSET: i32 = 10000;

/// Sentinel port.
pub const SENTINEL_PORT: i32 = 26379;

/// Total number of hash slots in a Redis cluster.
pub const TOTAL_HASH_SLOTS: u32 = 16384;

/// Pod-level configuration common to all topologies.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesConfig {
    /// Redis container image (default: redis:7.2).
    #[serde(default = "default_image")]
    pub image: String,

    /// Image pull policy (default: IfNotPresent).
    #[serde(default = "default_image_pull_policy")]
    pub image_pull_policy: String,

    /// Image pull secrets.
    #[serde(default)]
    pub image_pull_secrets: Vec<String>,

    /// Resource requests and limits.
    #[serde(default)]
    pub resources: ResourceRequirementsSpec,

    /// Secret holding the Redis password. Connections are unauthenticated when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_password_secret: Option<ExistingPasswordSecret>,

    /// Service exposure.
    #[serde(default)]
    pub service: ServiceOptions,

    /// Node selector for pod placement.
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            image_pull_policy: default_image_pull_policy(),
            image_pull_secrets: Vec::new(),
            resources: ResourceRequirementsSpec::default(),
            existing_password_secret: None,
            service: ServiceOptions::default(),
            node_selector: BTreeMap::new(),
        }
    }
}

fn default_image() -> String {
    "redis:7.2".to_string()
}

fn default_image_pull_policy() -> String {
    "IfNotPresent".to_string()
}

/// Reference to a key inside a Secret holding the Redis password.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExistingPasswordSecret {
    /// Secret name.
    pub name: String,

    /// Key within the secret (default: password).
    #[serde(default = "default_secret_key")]
    pub key: String,
}

fn default_secret_key() -> String {
    "password".to_string()
}

/// How the client Service is exposed.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOptions {
    /// Kubernetes Service type (default: ClusterIP).
    #[serde(default = "default_service_type")]
    pub service_type: String,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
        }
    }
}

fn default_service_type() -> String {
    "ClusterIP".to_string()
}

/// Resource requirements for Redis pods.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsSpec {
    /// CPU request (default: 100m).
    #[serde(default = "default_cpu_request")]
    pub cpu_request: String,

    /// Memory request (default: 128Mi).
    #[serde(default = "default_memory_request")]
    pub memory_request: String,

    /// CPU limit (default: 500m).
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: String,

    /// Memory limit (default: 512Mi).
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,
}

impl Default for ResourceRequirementsSpec {
    fn default() -> Self {
        Self {
            cpu_request: default_cpu_request(),
            memory_request: default_memory_request(),
            cpu_limit: default_cpu_limit(),
            memory_limit: default_memory_limit(),
        }
    }
}

fn default_cpu_request() -> String {
    "100m".to_string()
}

fn default_memory_request() -> String {
    "128Mi".to_string()
}

fn default_cpu_limit() -> String {
    "500m".to_string()
}

fn default_memory_limit() -> String {
    "512Mi".to_string()
}

/// TLS material for Redis connections, read from a Secret.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// Secret containing the CA, certificate and key.
    pub secret_name: String,

    /// Key of the CA certificate in the secret (default: ca.crt).
    #[serde(default = "default_ca_key")]
    pub ca: String,

    /// Key of the certificate in the secret (default: tls.crt).
    #[serde(default = "default_cert_key")]
    pub cert: String,

    /// Key of the private key in the secret (default: tls.key).
    #[serde(default = "default_key_key")]
    pub key: String,
}

fn default_ca_key() -> String {
    "ca.crt".to_string()
}

fn default_cert_key() -> String {
    "tls.crt".to_string()
}

fn default_key_key() -> String {
    "tls.key".to_string()
}

/// Prometheus exporter sidecar.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisExporter {
    /// Whether the exporter sidecar and its service port are enabled.
    #[serde(default)]
    pub enabled: bool,

    /// Exporter image.
    #[serde(default = "default_exporter_image")]
    pub image: String,
}

impl Default for RedisExporter {
    fn default() -> Self {
        Self {
            enabled: false,
            image: default_exporter_image(),
        }
    }
}

fn default_exporter_image() -> String {
    "oliver006/redis_exporter:v1.62.0".to_string()
}

/// Exporter metrics port.
pub const EXPORTER_PORT: i32 = 9121;

/// Persistent storage for Redis data.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Whether a PersistentVolumeClaim template is created (default: false).
    #[serde(default)]
    pub enabled: bool,

    /// Storage class name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Volume size (default: 1Gi).
    #[serde(default = "default_storage_size")]
    pub size: String,

    /// Keep the PersistentVolumeClaims when the resource is deleted.
    #[serde(default)]
    pub keep_after_delete: bool,
}

impl Default for StorageSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            storage_class_name: None,
            size: default_storage_size(),
            keep_after_delete: false,
        }
    }
}

fn default_storage_size() -> String {
    "1Gi".to_string()
}

/// Lifecycle state reported on every Redis resource.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ResourceState {
    /// Kubernetes resources are being created.
    #[default]
    Initializing,
    /// Redis topology is being formed.
    Bootstrap,
    /// Deployment is serving and healthy.
    Ready,
    /// Deployment has failed or disconnected nodes.
    Failed,
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceState::Initializing => write!(f, "Initializing"),
            ResourceState::Bootstrap => write!(f, "Bootstrap"),
            ResourceState::Ready => write!(f, "Ready"),
            ResourceState::Failed => write!(f, "Failed"),
        }
    }
}

/// Condition describes the state of a resource at a certain point.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message.
    pub message: String,
    /// Last time the condition transitioned.
    pub last_transition_time: String,
    /// The generation this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Ready", ready, reason, message, generation)
    }

    pub fn progressing(
        progressing: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self::new("Progressing", progressing, reason, message, generation)
    }

    pub fn degraded(degraded: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Degraded", degraded, reason, message, generation)
    }
}
