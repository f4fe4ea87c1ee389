//! Cluster State Inspector.
//!
//! Reads live state from Redis nodes. Nothing is cached: every call issues
//! fresh queries, because the cluster can change between calls.

use std::future::Future;

use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::api::Api;
use tracing::{debug, warn};

use crate::client::{
    ClusterInfo, ClusterTopologySnapshot, ReplicationInfo, SlotAssignment,
    types::count_slots_owned_by,
};
use crate::topology::addressing::NodeRef;
use crate::topology::connection::NodeConnector;
use crate::topology::error::{Result, TopologyError};

/// Live view of Redis nodes and the pods behind them.
pub trait ClusterInspector: Send + Sync {
    /// `CLUSTER NODES` as seen by `node`.
    fn cluster_nodes(&self, node: &NodeRef) -> impl Future<Output = Result<ClusterTopologySnapshot>> + Send;

    /// `CLUSTER SLOTS` as seen by `node`.
    fn cluster_slots(&self, node: &NodeRef) -> impl Future<Output = Result<Vec<SlotAssignment>>> + Send;

    fn cluster_info(&self, node: &NodeRef) -> impl Future<Output = Result<ClusterInfo>> + Send;

    /// `INFO replication` of `node`.
    fn replication_info(&self, node: &NodeRef) -> impl Future<Output = Result<ReplicationInfo>> + Send;

    /// PING answered with PONG.
    fn ping(&self, node: &NodeRef) -> impl Future<Output = Result<bool>> + Send;

    /// PING, then `CLUSTER MYID`. Never yields an empty ID.
    fn node_id(&self, node: &NodeRef) -> impl Future<Output = Result<String>> + Send;

    /// Current IP of a pod.
    fn pod_ip(&self, pod_name: &str) -> impl Future<Output = Result<String>> + Send;

    /// Slots owned by `node_id` according to `anchor`'s `CLUSTER SLOTS`.
    ///
    /// An unknown node owns zero slots; a failed query is an error.
    fn count_slots_owned_by(
        &self,
        anchor: &NodeRef,
        node_id: &str,
    ) -> impl Future<Output = Result<u32>> + Send {
        async move {
            let assignments = self.cluster_slots(anchor).await?;
            let slots = count_slots_owned_by(&assignments, node_id);
            debug!(node_id, slots, "Counted owned slots");
            Ok(slots)
        }
    }

    /// Connected replicas attached to `master_id`.
    fn attached_replicas(
        &self,
        anchor: &NodeRef,
        master_id: &str,
    ) -> impl Future<Output = Result<Vec<String>>> + Send {
        async move {
            let snapshot = self.cluster_nodes(anchor).await?;
            Ok(snapshot.attached_replicas(master_id))
        }
    }

    /// `role:master` from `INFO replication`. Any error reads as false.
    fn is_master(&self, node: &NodeRef) -> impl Future<Output = bool> + Send {
        async move {
            match self.replication_info(node).await {
                Ok(info) => info.is_master(),
                Err(e) => {
                    warn!(pod = %node.pod_name, error = %e, "Failed to read replication role");
                    false
                }
            }
        }
    }
}

/// Inspector backed by real connections and the Kubernetes API.
#[derive(Clone)]
pub struct LiveInspector {
    client: Client,
    namespace: String,
    connector: NodeConnector,
}

impl LiveInspector {
    pub fn new(client: Client, namespace: &str, connector: NodeConnector) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            connector,
        }
    }
}

impl ClusterInspector for LiveInspector {
    async fn cluster_nodes(&self, node: &NodeRef) -> Result<ClusterTopologySnapshot> {
        self.connector
            .with_node(node, |c| async move { c.cluster_nodes().await })
            .await
    }

    async fn cluster_slots(&self, node: &NodeRef) -> Result<Vec<SlotAssignment>> {
        self.connector
            .with_node(node, |c| async move { c.cluster_slots().await })
            .await
    }

    async fn cluster_info(&self, node: &NodeRef) -> Result<ClusterInfo> {
        self.connector
            .with_node(node, |c| async move { c.cluster_info().await })
            .await
    }

    async fn replication_info(&self, node: &NodeRef) -> Result<ReplicationInfo> {
        self.connector
            .with_node(node, |c| async move { c.info_replication().await })
            .await
    }

    async fn ping(&self, node: &NodeRef) -> Result<bool> {
        self.connector
            .with_node(node, |c| async move {
                Ok(c.ping().await?.eq_ignore_ascii_case("PONG"))
            })
            .await
    }

    async fn node_id(&self, node: &NodeRef) -> Result<String> {
        let id = self
            .connector
            .with_node(node, |c| async move {
                if !c.is_alive().await {
                    return Ok(None);
                }
                c.cluster_myid().await.map(Some)
            })
            .await?;

        match id.map(|id| id.trim().to_string()) {
            Some(id) if !id.is_empty() => Ok(id),
            Some(_) => Err(TopologyError::ProtocolParse {
                message: format!("empty node id from {}", node.pod_name),
                payload: String::new(),
            }),
            None => Err(TopologyError::precondition(format!(
                "{} did not answer PING",
                node.pod_name
            ))),
        }
    }

    async fn pod_ip(&self, pod_name: &str) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let pod = pods.get(pod_name).await?;
        pod.status
            .and_then(|s| s.pod_ip)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| TopologyError::precondition(format!("pod {} has no IP address", pod_name)))
    }
}
