//! Real-master resolution for replication groups.
//!
//! A pod reporting `role:master` is not trusted on its own: after a partition
//! a restarted replica comes back as an empty master. The real master is the
//! self-declared master with the most online replicas attached.

use std::collections::BTreeMap;

use crate::client::{ReplicationInfo, ReplicationRole};

/// Pod label read by the master and replica Services.
pub const REDIS_ROLE_LABEL: &str = "redis-role";

/// Value of the `redis-role` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleLabel {
    Master,
    Slave,
}

impl RoleLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleLabel::Master => "master",
            RoleLabel::Slave => "slave",
        }
    }

    pub fn from_is_master(is_master: bool) -> Self {
        if is_master {
            RoleLabel::Master
        } else {
            RoleLabel::Slave
        }
    }
}

impl std::fmt::Display for RoleLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one pod reported in `INFO replication`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRole {
    pub pod_name: String,
    /// `None` when the pod could not be queried.
    pub role: Option<ReplicationRole>,
    pub online_replicas: u32,
    /// Addresses of the replicas attached to this pod.
    pub replica_addresses: Vec<String>,
}

impl PodRole {
    pub fn observed(pod_name: &str, info: &ReplicationInfo) -> Self {
        Self {
            pod_name: pod_name.to_string(),
            role: Some(info.role),
            online_replicas: info.online_replica_count(),
            replica_addresses: info
                .replicas
                .iter()
                .filter(|r| r.is_online())
                .map(|r| r.ip.clone())
                .collect(),
        }
    }

    pub fn unreachable(pod_name: &str) -> Self {
        Self {
            pod_name: pod_name.to_string(),
            role: None,
            online_replicas: 0,
            replica_addresses: Vec::new(),
        }
    }

    pub fn claims_master(&self) -> bool {
        self.role == Some(ReplicationRole::Master)
    }
}

/// Pick the real master.
///
/// With a desired size of one the sole pod is the master. Otherwise the
/// self-declared master with the most online replicas wins; ties (including
/// the all-zero case of a fresh deployment) go to the lowest pod ordinal.
pub fn resolve_master(pods: &[PodRole], desired_size: i32) -> Option<&PodRole> {
    if desired_size == 1 {
        return pods.first();
    }

    pods.iter()
        .filter(|p| p.claims_master())
        .fold(None, |best: Option<&PodRole>, candidate| match best {
            Some(b) if b.online_replicas >= candidate.online_replicas => Some(b),
            _ => Some(candidate),
        })
}

/// Role of every pod for one reconcile pass. Recomputed each time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationRoleAssignment {
    pub master: Option<String>,
    pub labels: BTreeMap<String, RoleLabel>,
    /// Replica addresses confirmed attached to each master candidate.
    pub attached: BTreeMap<String, Vec<String>>,
    /// Pods claiming master that are not the real master.
    pub stray_masters: Vec<String>,
}

impl ReplicationRoleAssignment {
    pub fn resolve(pods: &[PodRole], desired_size: i32) -> Self {
        let master = resolve_master(pods, desired_size).map(|p| p.pod_name.clone());

        let labels = pods
            .iter()
            .map(|p| {
                let is_master = master.as_deref() == Some(p.pod_name.as_str());
                (p.pod_name.clone(), RoleLabel::from_is_master(is_master))
            })
            .collect();

        let attached = pods
            .iter()
            .filter(|p| p.claims_master())
            .map(|p| (p.pod_name.clone(), p.replica_addresses.clone()))
            .collect();

        let stray_masters = pods
            .iter()
            .filter(|p| p.claims_master() && master.as_deref() != Some(p.pod_name.as_str()))
            .map(|p| p.pod_name.clone())
            .collect();

        Self {
            master,
            labels,
            attached,
            stray_masters,
        }
    }

    /// Labels to write, or `None` while no master is resolved.
    pub fn labels_to_apply(&self) -> Option<&BTreeMap<String, RoleLabel>> {
        self.master.as_ref().map(|_| &self.labels)
    }

    pub fn label_for(&self, pod_name: &str) -> Option<RoleLabel> {
        self.labels.get(pod_name).copied()
    }
}
