//! Asynchronous replication: real-master resolution, `SLAVEOF` repair and
//! `redis-role` pod labels.

pub mod labels;
pub mod manager;
pub mod role;

pub use labels::{label_changes, label_cluster_pods, label_replication_pods};
pub use manager::{ReplicationManager, ReplicationReport};
pub use role::{
    PodRole, REDIS_ROLE_LABEL, ReplicationRoleAssignment, RoleLabel, resolve_master,
};
