//! Service generation.
//!
//! Every workload gets two services:
//! - **Headless Service** (`<sts>-headless`): stable pod DNS names, also used
//!   for hostname addressing of cluster nodes
//! - **Client Service** (`<sts>`): load-balanced client endpoint
//!
//! Replication workloads additionally get `<cr>-master` and `<cr>-replica`
//! services selecting on the `redis-role` pod label.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::{CLUSTER_BUS_PORT_OFFSET, EXPORTER_PORT};
use crate::replication::{REDIS_ROLE_LABEL, RoleLabel};
use crate::resources::common::{ServiceConfig, Workload, WorkloadKind};

/// Headless Service for stable pod DNS.
///
/// `publishNotReadyAddresses` lets cluster nodes resolve each other before
/// they report ready.
pub fn generate_headless_service(workload: &Workload) -> Service {
    let mut labels = workload.labels();
    labels.insert(
        "app.kubernetes.io/service-type".to_string(),
        "headless".to_string(),
    );

    let mut ports = vec![data_port(workload)];
    if workload.kind.is_cluster() {
        ports.push(ServicePort {
            port: workload.port + CLUSTER_BUS_PORT_OFFSET,
            target_port: Some(IntOrString::String("cluster-bus".to_string())),
            name: Some("cluster-bus".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        });
    }

    Service {
        metadata: metadata(workload, workload.headless_service_name(), labels),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(workload.selector_labels()),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Client Service with the type and ports taken from `config`.
pub fn generate_client_service(workload: &Workload, config: &ServiceConfig) -> Service {
    let mut labels = workload.labels();
    labels.insert(
        "app.kubernetes.io/service-type".to_string(),
        "client".to_string(),
    );

    Service {
        metadata: metadata(workload, workload.name.clone(), labels),
        spec: Some(ServiceSpec {
            type_: Some(config.service_type.clone()),
            selector: Some(workload.selector_labels()),
            ports: Some(client_ports(workload, config)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Service routing to the pods currently labeled with `role`.
pub fn generate_role_service(workload: &Workload, config: &ServiceConfig, role: RoleLabel) -> Service {
    let mut labels = workload.labels();
    labels.insert(
        "app.kubernetes.io/service-type".to_string(),
        role.as_str().to_string(),
    );

    let mut selector = workload.selector_labels();
    selector.insert(REDIS_ROLE_LABEL.to_string(), role.as_str().to_string());

    Service {
        metadata: metadata(workload, role_service_name(&workload.cr_name, role), labels),
        spec: Some(ServiceSpec {
            type_: Some(config.service_type.clone()),
            selector: Some(selector),
            ports: Some(client_ports(workload, config)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// `<cr>-master` or `<cr>-replica`.
pub fn role_service_name(cr_name: &str, role: RoleLabel) -> String {
    match role {
        RoleLabel::Master => format!("{}-master", cr_name),
        RoleLabel::Slave => format!("{}-replica", cr_name),
    }
}

fn metadata(workload: &Workload, name: String, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: workload.namespace.clone(),
        labels: Some(labels),
        owner_references: Some(vec![workload.owner.clone()]),
        ..Default::default()
    }
}

fn data_port(workload: &Workload) -> ServicePort {
    let name = if workload.kind == WorkloadKind::Sentinel {
        "sentinel"
    } else {
        "redis"
    };
    ServicePort {
        port: workload.port,
        target_port: Some(IntOrString::Int(workload.port)),
        name: Some(name.to_string()),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn client_ports(workload: &Workload, config: &ServiceConfig) -> Vec<ServicePort> {
    let mut ports = vec![data_port(workload)];
    if config.exporter_enabled {
        ports.push(ServicePort {
            port: EXPORTER_PORT,
            target_port: Some(IntOrString::Int(EXPORTER_PORT)),
            name: Some("redis-exporter".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        });
    }
    ports
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;
    use crate::crd::{ClusterRole, RedisCluster, RedisClusterSpec, RedisReplication, RedisReplicationSpec};

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("cache".to_string()),
            uid: Some("uid-1".to_string()),
            ..Default::default()
        }
    }

    fn leader() -> Workload {
        Workload::cluster(
            &RedisCluster {
                metadata: meta("orders"),
                spec: RedisClusterSpec::default(),
                status: None,
            },
            ClusterRole::Leader,
        )
    }

    #[test]
    fn test_generate_headless_service() {
        let svc = generate_headless_service(&leader());

        assert_eq!(svc.metadata.name.as_deref(), Some("orders-leader-headless"));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.publish_not_ready_addresses, Some(true));

        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 2);
        assert!(ports.iter().any(|p| p.port == 16379));
    }

    #[test]
    fn test_client_service_type_and_exporter_port() {
        let config = ServiceConfig {
            service_type: "LoadBalancer".to_string(),
            exporter_enabled: true,
        };
        let svc = generate_client_service(&leader(), &config);

        assert_eq!(svc.metadata.name.as_deref(), Some("orders-leader"));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[1].port, EXPORTER_PORT);
    }

    #[test]
    fn test_client_service_without_exporter() {
        let config = ServiceConfig {
            service_type: "ClusterIP".to_string(),
            exporter_enabled: false,
        };
        let ports = generate_client_service(&leader(), &config)
            .spec
            .unwrap()
            .ports
            .unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].name.as_deref(), Some("redis"));
    }

    #[test]
    fn test_master_service_selects_role_label() {
        let workload = Workload::replication(&RedisReplication {
            metadata: meta("sessions"),
            spec: RedisReplicationSpec::default(),
            status: None,
        });
        let svc = generate_role_service(&workload, &workload.service_config(), RoleLabel::Master);

        assert_eq!(svc.metadata.name.as_deref(), Some("sessions-master"));
        let selector = svc.spec.unwrap().selector.unwrap();
        assert_eq!(selector.get(REDIS_ROLE_LABEL).unwrap(), "master");
        assert_eq!(selector.get("app.kubernetes.io/instance").unwrap(), "sessions");
        assert_eq!(role_service_name("sessions", RoleLabel::Slave), "sessions-replica");
    }
}
