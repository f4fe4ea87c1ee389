//! Node addressing.
//!
//! Pods are addressed either by their headless-service DNS name or by pod
//! IP. The mode is fixed for a whole orchestration pass so that every
//! command built in that pass uses the same form.

use std::net::Ipv6Addr;

use crate::crd::ClusterRole;
use crate::topology::error::{Result, TopologyError};

/// How nodes are addressed in commands and connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    /// `<pod>.<service>-headless.<namespace>.svc`
    Hostname,
    /// The pod's current IP.
    PodIp,
}

impl AddressingMode {
    /// `v7` opts into DNS-stable addressing; anything else uses pod IPs.
    pub fn for_cluster_version(version: Option<&str>) -> Self {
        match version {
            Some("v7") => AddressingMode::Hostname,
            _ => AddressingMode::PodIp,
        }
    }
}

/// `host:port`, wrapping IPv6 literals in brackets.
pub fn format_address(host: &str, port: u16) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Headless service that governs a StatefulSet pod (`redis-leader-2` ->
/// `redis-leader-headless`).
pub fn headless_service_for_pod(pod_name: &str) -> String {
    let base = match pod_name.rsplit_once('-') {
        Some((base, ordinal)) if !ordinal.is_empty() && ordinal.chars().all(|c| c.is_ascii_digit()) => {
            base
        }
        _ => pod_name,
    };
    format!("{}-headless", base)
}

pub fn pod_fqdn(pod_name: &str, namespace: &str) -> String {
    format!(
        "{}.{}.{}.svc",
        pod_name,
        headless_service_for_pod(pod_name),
        namespace
    )
}

/// One addressable Redis server. Built fresh for each operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub pod_name: String,
    pub namespace: String,
    /// DNS name or IP, without brackets.
    pub host: String,
    pub port: u16,
}

impl NodeRef {
    /// `host:port` as used on the redis-cli command line.
    pub fn address(&self) -> String {
        format_address(&self.host, self.port)
    }

    /// Same pod, different port (e.g. the sentinel port).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Addressing policy for the pods of one custom resource.
#[derive(Debug, Clone)]
pub struct Addressing {
    name: String,
    namespace: String,
    port: u16,
    mode: AddressingMode,
}

impl Addressing {
    pub fn new(name: &str, namespace: &str, port: u16, mode: AddressingMode) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            port,
            mode,
        }
    }

    pub fn mode(&self) -> AddressingMode {
        self.mode
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `<cr>-<role>-<index>` for cluster pods.
    pub fn cluster_pod(&self, role: ClusterRole, index: i32) -> String {
        format!("{}-{}-{}", self.name, role.suffix(), index)
    }

    /// `<cr>-<index>` for replication and standalone pods.
    pub fn replication_pod(&self, index: i32) -> String {
        format!("{}-{}", self.name, index)
    }

    /// Whether building a node reference needs the pod IP.
    pub fn needs_pod_ip(&self) -> bool {
        self.mode == AddressingMode::PodIp
    }

    /// Build a node reference. In IP mode a missing or empty IP is an error,
    /// so an empty address is never produced.
    pub fn node_ref(&self, pod_name: &str, pod_ip: Option<&str>) -> Result<NodeRef> {
        let host = match self.mode {
            AddressingMode::Hostname => pod_fqdn(pod_name, &self.namespace),
            AddressingMode::PodIp => match pod_ip.map(str::trim) {
                Some(ip) if !ip.is_empty() => ip.to_string(),
                _ => {
                    return Err(TopologyError::precondition(format!(
                        "pod {} has no IP address",
                        pod_name
                    )));
                }
            },
        };

        Ok(NodeRef {
            pod_name: pod_name.to_string(),
            namespace: self.namespace.clone(),
            host,
            port: self.port,
        })
    }
}
