//! Status management utilities.
//!
//! Status is written with a merge patch on the status subresource. Only
//! RedisCluster carries conditions; they are derived from the lifecycle
//! state every pass.

use kube::Api;
use kube::api::{Patch, PatchParams};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::Result;
use crate::crd::{Condition, ResourceState};

/// Merge-patch `status` onto a resource.
pub async fn patch_status<K, S>(api: &Api<K>, name: &str, status: &S) -> Result<()>
where
    K: Clone + DeserializeOwned + std::fmt::Debug,
    S: Serialize,
{
    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// Ready, Progressing and Degraded conditions for a lifecycle state.
pub fn conditions_for(state: ResourceState, reason: &str, generation: Option<i64>) -> Vec<Condition> {
    let message = if reason.is_empty() {
        state.to_string()
    } else {
        reason.to_string()
    };
    let reason = state.to_string();

    vec![
        Condition::ready(state == ResourceState::Ready, &reason, &message, generation),
        Condition::progressing(
            matches!(state, ResourceState::Initializing | ResourceState::Bootstrap),
            &reason,
            &message,
            generation,
        ),
        Condition::degraded(state == ResourceState::Failed, &reason, &message, generation),
    ]
}

/// Keep `last_transition_time` of conditions whose status did not change.
pub fn carry_transition_times(previous: &[Condition], mut next: Vec<Condition>) -> Vec<Condition> {
    for condition in &mut next {
        if let Some(old) = previous
            .iter()
            .find(|c| c.r#type == condition.r#type && c.status == condition.status)
        {
            condition.last_transition_time = old.last_transition_time.clone();
        }
    }
    next
}

/// Check if a condition type is true
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .is_some_and(|c| c.status == "True")
}
