//! StatefulSet generation.
//!
//! Every topology runs as a StatefulSet behind a headless Service:
//! - Redis container named after the StatefulSet (the exec target for
//!   `redis-cli --cluster` is the `<cr>-leader` container)
//! - Password from the existing secret, exposed to redis-cli as `REDISCLI_AUTH`
//! - TLS material mounted at `/tls`
//! - Optional exporter sidecar and persistent storage

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource, ExecAction, KeyToPath,
    LocalObjectReference, ObjectFieldSelector, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PodSpec, PodTemplateSpec, Probe, ResourceRequirements, SecretKeySelector, SecretVolumeSource,
    Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use crate::crd::{CLUSTER_BUS_PORT_OFFSET, EXPORTER_PORT, StorageSpec};
use crate::resources::common::{Workload, WorkloadKind};

/// Mount point of the TLS secret; `redis-cli --cacert` reads from here.
pub const TLS_MOUNT_PATH: &str = "/tls";
const DATA_MOUNT_PATH: &str = "/data";
const PASSWORD_ENV: &str = "REDIS_PASSWORD";
const EXPORTER_CONTAINER: &str = "redis-exporter";

/// Generate the StatefulSet for a workload.
pub fn generate_statefulset(workload: &Workload) -> StatefulSet {
    let labels = workload.labels();

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(workload.name.clone()),
            namespace: workload.namespace.clone(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![workload.owner.clone()]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(workload.replicas),
            service_name: Some(workload.headless_service_name()),
            selector: LabelSelector {
                match_labels: Some(workload.selector_labels()),
                ..Default::default()
            },
            // Cluster formation needs every pod up, not one at a time
            pod_management_policy: Some("Parallel".to_string()),
            template: generate_pod_template(workload, &labels),
            volume_claim_templates: workload
                .storage
                .as_ref()
                .filter(|s| s.enabled)
                .map(|s| vec![generate_pvc_template(s, workload.selector_labels())]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn generate_pod_template(workload: &Workload, labels: &BTreeMap<String, String>) -> PodTemplateSpec {
    let config = &workload.kubernetes_config;

    let mut containers = vec![generate_redis_container(workload)];
    if workload.service_config().exporter_enabled {
        containers.push(generate_exporter_container(workload));
    }

    let image_pull_secrets = if config.image_pull_secrets.is_empty() {
        None
    } else {
        Some(
            config
                .image_pull_secrets
                .iter()
                .map(|name| LocalObjectReference { name: name.clone() })
                .collect(),
        )
    };

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels.clone()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers,
            volumes: Some(generate_volumes(workload)),
            node_selector: if config.node_selector.is_empty() {
                None
            } else {
                Some(config.node_selector.clone())
            },
            image_pull_secrets,
            ..Default::default()
        }),
    }
}

fn generate_redis_container(workload: &Workload) -> Container {
    let config = &workload.kubernetes_config;

    let mut ports = vec![ContainerPort {
        container_port: workload.port,
        name: Some(port_name(workload.kind).to_string()),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }];
    if workload.kind.is_cluster() {
        ports.push(ContainerPort {
            container_port: workload.port + CLUSTER_BUS_PORT_OFFSET,
            name: Some("cluster-bus".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        });
    }

    Container {
        name: workload.name.clone(),
        image: Some(config.image.clone()),
        image_pull_policy: Some(config.image_pull_policy.clone()),
        command: Some(vec!["sh".to_string(), "-c".to_string()]),
        args: Some(vec![server_command(workload)]),
        ports: Some(ports),
        env: Some(generate_env_vars(workload)),
        resources: Some(generate_resource_requirements(workload)),
        volume_mounts: Some(generate_volume_mounts(workload)),
        readiness_probe: Some(generate_probe(workload, 5)),
        liveness_probe: Some(generate_probe(workload, 15)),
        ..Default::default()
    }
}

fn port_name(kind: WorkloadKind) -> &'static str {
    match kind {
        WorkloadKind::Sentinel => "sentinel",
        _ => "redis",
    }
}

/// Shell command starting the server with topology-specific flags.
pub fn server_command(workload: &Workload) -> String {
    let mut flags = Vec::new();

    if workload.kind == WorkloadKind::Sentinel {
        // Sentinel rewrites its config file, so it must live on a writable volume
        let conf = format!("{}/sentinel.conf", DATA_MOUNT_PATH);
        flags.push(format!("touch {conf} && exec redis-server {conf} --sentinel"));
    } else {
        flags.push("exec redis-server".to_string());
        flags.push(format!("--dir {}", DATA_MOUNT_PATH));
    }

    if workload.tls.is_some() {
        flags.push(format!("--tls-port {}", workload.port));
        flags.push("--port 0".to_string());
        flags.push(format!("--tls-cert-file {}/tls.crt", TLS_MOUNT_PATH));
        flags.push(format!("--tls-key-file {}/tls.key", TLS_MOUNT_PATH));
        flags.push(format!("--tls-ca-cert-file {}/ca.crt", TLS_MOUNT_PATH));
        flags.push("--tls-auth-clients optional".to_string());
        flags.push("--tls-replication yes".to_string());
        if workload.kind.is_cluster() {
            flags.push("--tls-cluster yes".to_string());
        }
    } else {
        flags.push(format!("--port {}", workload.port));
    }

    if workload.kubernetes_config.existing_password_secret.is_some() {
        flags.push(format!("--requirepass \"${}\"", PASSWORD_ENV));
        if workload.kind != WorkloadKind::Sentinel {
            flags.push(format!("--masterauth \"${}\"", PASSWORD_ENV));
        }
    }

    if workload.kind.is_cluster() {
        flags.push("--cluster-enabled yes".to_string());
        flags.push(format!("--cluster-config-file {}/nodes.conf", DATA_MOUNT_PATH));
        flags.push("--cluster-node-timeout 5000".to_string());
        if workload.announce_hostname {
            let namespace = workload.namespace.as_deref().unwrap_or("default");
            flags.push(format!(
                "--cluster-announce-hostname \"$POD_NAME.{}.{}.svc\"",
                workload.headless_service_name(),
                namespace
            ));
            flags.push("--cluster-preferred-endpoint-type hostname".to_string());
        }
    }

    if workload
        .storage
        .as_ref()
        .is_some_and(|s| s.enabled)
    {
        flags.push("--appendonly yes".to_string());
    }

    flags.join(" ")
}

fn generate_env_vars(workload: &Workload) -> Vec<EnvVar> {
    let mut env = vec![EnvVar {
        name: "POD_NAME".to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: "metadata.name".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }];

    if let Some(secret) = &workload.kubernetes_config.existing_password_secret {
        let source = EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.name.clone(),
                key: secret.key.clone(),
                optional: Some(false),
            }),
            ..Default::default()
        };
        env.push(EnvVar {
            name: PASSWORD_ENV.to_string(),
            value_from: Some(source.clone()),
            ..Default::default()
        });
        // Probes run redis-cli without -a
        env.push(EnvVar {
            name: "REDISCLI_AUTH".to_string(),
            value_from: Some(source),
            ..Default::default()
        });
    }

    env
}

fn generate_resource_requirements(workload: &Workload) -> ResourceRequirements {
    let resources = &workload.kubernetes_config.resources;
    ResourceRequirements {
        limits: Some({
            let mut limits = BTreeMap::new();
            limits.insert("cpu".to_string(), Quantity(resources.cpu_limit.clone()));
            limits.insert("memory".to_string(), Quantity(resources.memory_limit.clone()));
            limits
        }),
        requests: Some({
            let mut requests = BTreeMap::new();
            requests.insert("cpu".to_string(), Quantity(resources.cpu_request.clone()));
            requests.insert(
                "memory".to_string(),
                Quantity(resources.memory_request.clone()),
            );
            requests
        }),
        ..Default::default()
    }
}

/// PING probe; TLS pods are probed over TLS on localhost without
/// certificate name checks.
fn generate_probe(workload: &Workload, initial_delay: i32) -> Probe {
    let mut cli = format!("redis-cli -p {}", workload.port);
    if workload.tls.is_some() {
        cli.push_str(&format!(" --tls --cacert {}/ca.crt --insecure", TLS_MOUNT_PATH));
    }

    Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("{} ping | grep PONG", cli),
            ]),
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        failure_threshold: Some(3),
        ..Default::default()
    }
}

fn generate_exporter_container(workload: &Workload) -> Container {
    let image = workload
        .exporter
        .as_ref()
        .map(|e| e.image.clone())
        .unwrap_or_default();
    let scheme = if workload.tls.is_some() { "rediss" } else { "redis" };

    let mut env = vec![EnvVar {
        name: "REDIS_ADDR".to_string(),
        value: Some(format!("{}://localhost:{}", scheme, workload.port)),
        ..Default::default()
    }];
    if let Some(secret) = &workload.kubernetes_config.existing_password_secret {
        env.push(EnvVar {
            name: "REDIS_PASSWORD".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret.name.clone(),
                    key: secret.key.clone(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    if workload.tls.is_some() {
        env.push(EnvVar {
            name: "REDIS_EXPORTER_SKIP_TLS_VERIFICATION".to_string(),
            value: Some("true".to_string()),
            ..Default::default()
        });
    }

    Container {
        name: EXPORTER_CONTAINER.to_string(),
        image: Some(image),
        ports: Some(vec![ContainerPort {
            container_port: EXPORTER_PORT,
            name: Some("redis-exporter".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(env),
        ..Default::default()
    }
}

fn generate_volumes(workload: &Workload) -> Vec<Volume> {
    let mut volumes = Vec::new();

    if !workload.storage.as_ref().is_some_and(|s| s.enabled) {
        volumes.push(Volume {
            name: "data".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
    }

    if let Some(tls) = &workload.tls {
        let item = |key: &str, path: &str| KeyToPath {
            key: key.to_string(),
            path: path.to_string(),
            ..Default::default()
        };
        volumes.push(Volume {
            name: "tls-certs".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(tls.secret_name.clone()),
                items: Some(vec![
                    item(&tls.ca, "ca.crt"),
                    item(&tls.cert, "tls.crt"),
                    item(&tls.key, "tls.key"),
                ]),
                default_mode: Some(0o400),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    volumes
}

fn generate_volume_mounts(workload: &Workload) -> Vec<VolumeMount> {
    let mut mounts = vec![VolumeMount {
        name: "data".to_string(),
        mount_path: DATA_MOUNT_PATH.to_string(),
        ..Default::default()
    }];
    if workload.tls.is_some() {
        mounts.push(VolumeMount {
            name: "tls-certs".to_string(),
            mount_path: TLS_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }
    mounts
}

/// Claims carry the pod selector labels so they can be found on deletion.
fn generate_pvc_template(
    storage: &StorageSpec,
    labels: BTreeMap<String, String>,
) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some("data".to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: storage.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some({
                    let mut requests = BTreeMap::new();
                    requests.insert("storage".to_string(), Quantity(storage.size.clone()));
                    requests
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
