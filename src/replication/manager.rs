//! Replication Role Manager.
//!
//! Queries every pod of a replication group, resolves the real master and
//! points stray masters back at it with `SLAVEOF`.

use tracing::{debug, info, instrument, warn};

use crate::replication::role::{PodRole, ReplicationRoleAssignment};
use crate::topology::{
    Addressing, ClusterCommand, ClusterInspector, CommandExecutor, NodeRef, Result,
};

/// Outcome of one replication pass.
#[derive(Debug, Clone, Default)]
pub struct ReplicationReport {
    pub assignment: ReplicationRoleAssignment,
    /// Stray masters sent `SLAVEOF` this pass.
    pub repointed: Vec<String>,
    /// Stray masters that could not be repointed.
    pub failed: Vec<String>,
}

impl ReplicationReport {
    pub fn master(&self) -> Option<&str> {
        self.assignment.master.as_deref()
    }
}

pub struct ReplicationManager<E, I> {
    executor: E,
    inspector: I,
    addressing: Addressing,
    size: i32,
}

impl<E: CommandExecutor, I: ClusterInspector> ReplicationManager<E, I> {
    pub fn new(executor: E, inspector: I, addressing: Addressing, size: i32) -> Self {
        Self {
            executor,
            inspector,
            addressing,
            size,
        }
    }

    pub fn inspector(&self) -> &I {
        &self.inspector
    }

    pub fn addressing(&self) -> &Addressing {
        &self.addressing
    }

    pub async fn node(&self, pod_name: &str) -> Result<NodeRef> {
        let ip = if self.addressing.needs_pod_ip() {
            Some(self.inspector.pod_ip(pod_name).await?)
        } else {
            None
        };
        self.addressing.node_ref(pod_name, ip.as_deref())
    }

    /// `INFO replication` of `<name>-0..size`. Pods that cannot be reached
    /// are reported without a role.
    #[instrument(skip(self), fields(name = %self.addressing.name()))]
    pub async fn observe(&self) -> Vec<PodRole> {
        let mut pods = Vec::new();
        for index in 0..self.size {
            let pod_name = self.addressing.replication_pod(index);
            let observed = match self.node(&pod_name).await {
                Ok(node) => match self.inspector.replication_info(&node).await {
                    Ok(info) => PodRole::observed(&pod_name, &info),
                    Err(e) => {
                        warn!(pod = %pod_name, error = %e, "Failed to read replication info");
                        PodRole::unreachable(&pod_name)
                    }
                },
                Err(e) => {
                    debug!(pod = %pod_name, error = %e, "Pod not addressable yet");
                    PodRole::unreachable(&pod_name)
                }
            };
            pods.push(observed);
        }
        pods
    }

    pub async fn resolve(&self) -> ReplicationRoleAssignment {
        let pods = self.observe().await;
        ReplicationRoleAssignment::resolve(&pods, self.size)
    }

    /// Node reference of the real master, if one can be resolved.
    pub async fn master_node(&self) -> Result<Option<NodeRef>> {
        match self.resolve().await.master {
            Some(pod) => self.node(&pod).await.map(Some),
            None => Ok(None),
        }
    }

    /// Resolve the master and send `SLAVEOF <master> <port>` to every other
    /// pod claiming mastership.
    ///
    /// A stray master that cannot be repointed is logged and retried next
    /// pass; only failing to address the real master is an error.
    #[instrument(skip(self), fields(name = %self.addressing.name()))]
    pub async fn reconcile_topology(&self) -> Result<ReplicationReport> {
        let pods = self.observe().await;
        let assignment = ReplicationRoleAssignment::resolve(&pods, self.size);

        let mut report = ReplicationReport {
            assignment,
            ..Default::default()
        };
        let Some(master_pod) = report.assignment.master.clone() else {
            debug!("No master candidate yet");
            return Ok(report);
        };
        if report.assignment.stray_masters.is_empty() {
            return Ok(report);
        }

        let master = self.node(&master_pod).await?;
        let command = ClusterCommand::ReplicaOf {
            host: master.host.clone(),
            port: master.port,
        };

        for stray in report.assignment.stray_masters.clone() {
            let result = match self.node(&stray).await {
                Ok(node) => self.executor.execute(&node, &command).await.map(|_| ()),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => {
                    info!(pod = %stray, master = %master_pod, "Pointed stray master at real master");
                    report.repointed.push(stray);
                }
                Err(e) => {
                    warn!(pod = %stray, master = %master_pod, error = %e, "Failed to repoint stray master");
                    report.failed.push(stray);
                }
            }
        }

        Ok(report)
    }
}
