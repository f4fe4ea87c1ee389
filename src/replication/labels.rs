//! `redis-role` pod labels.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info, warn};

use crate::replication::role::{REDIS_ROLE_LABEL, ReplicationRoleAssignment, RoleLabel};
use crate::topology::{Addressing, ClusterInspector, Result};

/// Attempts per pod before a conflicting label patch is given up.
const LABEL_PATCH_ATTEMPTS: u32 = 5;

/// Whether the pod's current label differs from `desired`.
pub fn needs_relabel(current: Option<&str>, desired: RoleLabel) -> bool {
    current != Some(desired.as_str())
}

/// Merge patch setting `redis-role`.
pub fn role_label_patch(role: RoleLabel) -> serde_json::Value {
    serde_json::json!({
        "metadata": {
            "labels": {
                REDIS_ROLE_LABEL: role.as_str()
            }
        }
    })
}

/// Labels to patch so that every pod named in `desired` carries its role.
///
/// `current` is each pod's name and present `redis-role` value. Pods missing
/// from `desired` keep whatever label they have.
pub fn label_changes(
    current: &[(String, Option<String>)],
    desired: &BTreeMap<String, RoleLabel>,
) -> Vec<(String, RoleLabel)> {
    current
        .iter()
        .filter_map(|(name, label)| {
            let role = *desired.get(name)?;
            needs_relabel(label.as_deref(), role).then(|| (name.clone(), role))
        })
        .collect()
}

/// Label the pods of a replication group from the resolved assignment.
///
/// Nothing is written until a master has been resolved, so a group never
/// loses its only `master` label to a transient failure.
pub async fn label_replication_pods(
    client: &Client,
    namespace: &str,
    selector: &str,
    assignment: &ReplicationRoleAssignment,
) -> Result<usize> {
    let Some(labels) = assignment.labels_to_apply() else {
        debug!("No master resolved, leaving redis-role labels unchanged");
        return Ok(0);
    };
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let list = pods.list(&ListParams::default().labels(selector)).await?;
    relabel(&pods, &list.items, labels).await
}

/// Label cluster pods with their live role.
///
/// Every shard has its own master, so each pod's `INFO replication` answer
/// is the role. Pods whose role cannot be read are labeled `slave`.
pub async fn label_cluster_pods<I: ClusterInspector>(
    client: &Client,
    inspector: &I,
    addressing: &Addressing,
    selector: &str,
) -> Result<usize> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), addressing.namespace());
    let list = pods.list(&ListParams::default().labels(selector)).await?;

    let mut desired = BTreeMap::new();
    for pod in &list.items {
        let name = pod.name_any();
        let ip = pod.status.as_ref().and_then(|s| s.pod_ip.clone());
        match addressing.node_ref(&name, ip.as_deref()) {
            Ok(node) => {
                let role = RoleLabel::from_is_master(inspector.is_master(&node).await);
                desired.insert(name, role);
            }
            Err(e) => {
                debug!(pod = %name, error = %e, "Skipping role label for unaddressable pod");
            }
        }
    }
    relabel(&pods, &list.items, &desired).await
}

async fn relabel(
    pods: &Api<Pod>,
    items: &[Pod],
    desired: &BTreeMap<String, RoleLabel>,
) -> Result<usize> {
    let current: Vec<(String, Option<String>)> = items
        .iter()
        .map(|pod| (pod.name_any(), pod.labels().get(REDIS_ROLE_LABEL).cloned()))
        .collect();

    let changes = label_changes(&current, desired);
    for (name, role) in &changes {
        patch_role_label(pods, name, *role).await?;
        info!(pod = %name, role = %role, "Updated redis-role label");
    }
    Ok(changes.len())
}

async fn patch_role_label(pods: &Api<Pod>, name: &str, role: RoleLabel) -> Result<()> {
    let patch = role_label_patch(role);
    for attempt in 1..=LABEL_PATCH_ATTEMPTS {
        match pods
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => return Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 && attempt < LABEL_PATCH_ATTEMPTS => {
                warn!(pod = %name, attempt, "Conflict updating redis-role label, retrying");
                tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
