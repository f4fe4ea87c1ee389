//! Shared controller helpers.
//!
//! Finalizers, server-side apply of owned resources and the per-pass
//! connection parameters built from secrets. Used by all four controllers.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::client::TlsCertData;
use crate::controller::context::{Context, FIELD_MANAGER};
use crate::controller::error::{Error, Result};
use crate::crd::{ExistingPasswordSecret, KubernetesConfig, TlsConfig};
use crate::resources::{Workload, label_selector, services, statefulset};
use crate::topology::ConnectionParams;

/// Finalizer placed on every Redis resource.
pub const FINALIZER: &str = "redisoperator.smoketurner.com/finalizer";

/// Add a finalizer to a resource.
pub async fn add_finalizer<T>(api: &Api<T>, name: &str, finalizer: &str) -> Result<()>
where
    T: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    let resource = api.get(name).await?;
    let mut finalizers = resource.finalizers().to_vec();

    if !finalizers.iter().any(|f| f == finalizer) {
        finalizers.push(finalizer.to_string());

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
    }
    Ok(())
}

/// Remove a specific finalizer from a resource.
pub async fn remove_finalizer<T>(api: &Api<T>, name: &str, finalizer: &str) -> Result<()>
where
    T: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    let resource = match api.get(name).await {
        Ok(r) => r,
        Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut finalizers = resource.finalizers().to_vec();
    if let Some(pos) = finalizers.iter().position(|f| f == finalizer) {
        finalizers.remove(pos);

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
    }
    Ok(())
}

/// Release a deleted resource: drop its volume claims unless storage is
/// kept, then remove the finalizer.
pub async fn finalize<K>(
    client: &Client,
    api: &Api<K>,
    name: &str,
    workloads: &[Workload],
) -> Result<Action>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <K as Resource>::DynamicType: Default,
{
    info!(name = %name, "Handling deletion");
    for workload in workloads {
        let drop_claims = workload
            .storage
            .as_ref()
            .is_some_and(|s| s.enabled && !s.keep_after_delete);
        if drop_claims {
            delete_workload_claims(client, workload).await?;
        }
    }
    remove_finalizer(api, name, FINALIZER).await?;
    Ok(Action::await_change())
}

/// Error policy shared by every controller.
pub fn error_policy<K>(obj: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    if let Some(ref health_state) = ctx.health_state {
        health_state
            .metrics
            .record_error(&K::kind(&()), &namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}

/// Server-side apply the StatefulSet and its headless and client Services.
pub async fn apply_workload(client: &Client, workload: &Workload) -> Result<()> {
    let namespace = workload_namespace(workload)?;
    let params = PatchParams::apply(FIELD_MANAGER).force();

    let sts_api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    sts_api
        .patch(
            &workload.name,
            &params,
            &Patch::Apply(&statefulset::generate_statefulset(workload)),
        )
        .await?;

    let svc_api: Api<Service> = Api::namespaced(client.clone(), namespace);
    svc_api
        .patch(
            &workload.headless_service_name(),
            &params,
            &Patch::Apply(&services::generate_headless_service(workload)),
        )
        .await?;

    let config = workload.service_config();
    svc_api
        .patch(
            &workload.name,
            &params,
            &Patch::Apply(&services::generate_client_service(workload, &config)),
        )
        .await?;

    debug!(statefulset = %workload.name, "Applied owned resources");
    Ok(())
}

/// Server-side apply an additional Service.
pub async fn apply_service(client: &Client, namespace: &str, service: &Service) -> Result<()> {
    let name = service
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::MissingField("service metadata.name".to_string()))?;
    let api: Api<Service> = Api::namespaced(client.clone(), namespace);
    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(service),
    )
    .await?;
    Ok(())
}

fn workload_namespace(workload: &Workload) -> Result<&str> {
    workload
        .namespace
        .as_deref()
        .ok_or_else(|| Error::MissingField("metadata.namespace".to_string()))
}

/// `(spec.replicas, status.readyReplicas)` of a StatefulSet, zero when absent.
pub async fn statefulset_replicas(client: &Client, namespace: &str, name: &str) -> Result<(i32, i32)> {
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    match api.get_opt(name).await? {
        Some(sts) => {
            let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
            let ready = sts
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0);
            Ok((desired, ready))
        }
        None => Ok((0, 0)),
    }
}

/// Delete the claims created from a workload's volume template.
pub async fn delete_workload_claims(client: &Client, workload: &Workload) -> Result<usize> {
    let namespace = workload_namespace(workload)?;
    let api: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), namespace);
    let selector = label_selector(&workload.selector_labels());
    let claims = api.list(&ListParams::default().labels(&selector)).await?;

    let mut deleted = 0;
    for claim in claims.items {
        let name = claim.name_any();
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(claim = %name, "Deleted persistent volume claim");
                deleted += 1;
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(deleted)
}

/// Read the password from `existingPasswordSecret`, trimmed of whitespace.
pub async fn read_password(
    client: &Client,
    namespace: &str,
    secret_ref: &ExistingPasswordSecret,
) -> Result<String> {
    let secret = get_secret(client, namespace, &secret_ref.name).await?;
    let bytes = secret_value(&secret, &secret_ref.key)?;
    let password = String::from_utf8(bytes)
        .map_err(|e| Error::Validation(format!("Invalid password encoding: {}", e)))?;
    Ok(password.trim().to_string())
}

/// Read CA, certificate and key from the TLS secret.
pub async fn read_tls(client: &Client, namespace: &str, tls: &TlsConfig) -> Result<TlsCertData> {
    let secret = get_secret(client, namespace, &tls.secret_name).await?;
    Ok(TlsCertData {
        ca_cert_pem: secret_value(&secret, &tls.ca)?,
        client_cert_pem: secret_value(&secret, &tls.cert).ok(),
        client_key_pem: secret_value(&secret, &tls.key).ok(),
    })
}

/// A secret that does not exist yet is retried rather than treated as a
/// deleted resource.
async fn get_secret(client: &Client, namespace: &str, name: &str) -> Result<Secret> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    api.get_opt(name)
        .await?
        .ok_or_else(|| Error::Transient(format!("secret {} not found", name)))
}

/// Decoded value of `key`. A missing key is an error.
pub fn secret_value(secret: &Secret, key: &str) -> Result<Vec<u8>> {
    if let Some(value) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return Ok(value.0.clone());
    }
    if let Some(value) = secret.string_data.as_ref().and_then(|d| d.get(key)) {
        return Ok(value.clone().into_bytes());
    }
    Err(Error::MissingField(format!(
        "key {} in secret {}",
        key,
        secret.name_any()
    )))
}

/// Connection parameters for one reconcile pass.
pub async fn connection_params(
    client: &Client,
    namespace: &str,
    name: &str,
    port: i32,
    cluster_version: Option<&str>,
    kubernetes_config: &KubernetesConfig,
    tls: Option<&TlsConfig>,
) -> Result<ConnectionParams> {
    let password = match &kubernetes_config.existing_password_secret {
        Some(secret_ref) => Some(read_password(client, namespace, secret_ref).await?),
        None => None,
    };
    let tls = match tls {
        Some(tls) => Some(read_tls(client, namespace, tls).await?),
        None => None,
    };
    let port = u16::try_from(port)
        .map_err(|_| Error::Validation(format!("port {} out of range", port)))?;

    Ok(ConnectionParams {
        namespace: namespace.to_string(),
        name: name.to_string(),
        port,
        cluster_version: cluster_version.map(str::to_string),
        password,
        tls,
    })
}
