//! Shared Kubernetes utilities using kube-rs
//!
//! Provides the kubectl-equivalent operations the migration steps need
//! (rollout status, apply, existence checks) without shelling out to kubectl.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DynamicObject, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::config::{WorkloadKind, WorkloadRef};
use crate::Error;

/// Ready condition type
pub const CONDITION_READY: &str = "Ready";
/// Condition status value for true
pub const STATUS_TRUE: &str = "True";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "cni-migration";

/// Interval between rollout status polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Upper bound on a single rollout wait, matching the helm operation timeout
pub const DEFAULT_ROLLOUT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Conditions
// =============================================================================

/// Check if a condition of the given type has status "True"
pub fn has_condition<T>(conditions: Option<&[T]>, condition_type: &str) -> bool
where
    T: HasConditionFields,
{
    conditions
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_field() == condition_type && c.status_field() == STATUS_TRUE)
        })
        .unwrap_or(false)
}

/// Trait for types that have condition-like fields (type and status)
pub trait HasConditionFields {
    /// Get the condition type field value
    fn type_field(&self) -> &str;
    /// Get the condition status field value
    fn status_field(&self) -> &str;
}

impl HasConditionFields for k8s_openapi::api::core::v1::PodCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

/// Whether a pod reports Ready=True
pub fn pod_is_ready(pod: &Pod) -> bool {
    let conditions = pod.status.as_ref().and_then(|s| s.conditions.as_ref());
    has_condition(conditions.map(|c| c.as_slice()), CONDITION_READY)
}

// =============================================================================
// Polling
// =============================================================================

/// Poll until a condition is met or timeout is reached
///
/// Repeatedly calls `check_fn` until it returns `Ok(true)`. Transient API
/// errors (throttling, server errors) are retried; any other error ends the
/// wait immediately with its cause intact.
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    timeout_msg: impl Into<String>,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let start = std::time::Instant::now();
    let timeout_msg = timeout_msg.into();

    loop {
        if start.elapsed() > timeout {
            return Err(Error::internal_with_context("poll_until", timeout_msg));
        }

        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => {
                trace!("Polling condition not yet met, retrying...");
            }
            Err(e) if e.is_transient() => {
                debug!("Polling check hit a transient error (retrying): {}", e);
            }
            Err(e) => return Err(e),
        }

        tokio::time::sleep(poll_interval).await;
    }
}

// =============================================================================
// Client construction
// =============================================================================

/// Create a kube client from an optional kubeconfig path and context
///
/// Without a path the config is inferred (`KUBECONFIG`, `~/.kube/config`,
/// in-cluster service account).
pub async fn create_client(
    kubeconfig: Option<&Path>,
    context: Option<&str>,
) -> Result<Client, Error> {
    let options = KubeConfigOptions {
        context: context.map(str::to_string),
        ..Default::default()
    };

    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None if context.is_some() => Config::from_kubeconfig(&options).await.map_err(|e| {
            Error::internal_with_context(
                "create_client",
                format!("failed to load kubeconfig: {}", e),
            )
        })?,
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };

    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

// =============================================================================
// Rollout status
// =============================================================================

/// Whether a deployment has finished rolling out
///
/// Same rules as `kubectl rollout status`: the controller has observed the
/// latest generation, every desired replica is updated and available, and no
/// old replicas are left.
pub fn deployment_rolled_out(deployment: &Deployment) -> bool {
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };

    let generation = deployment.metadata.generation.unwrap_or(0);
    if status.observed_generation.unwrap_or(0) < generation {
        return false;
    }

    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let updated = status.updated_replicas.unwrap_or(0);
    let total = status.replicas.unwrap_or(0);
    let available = status.available_replicas.unwrap_or(0);

    updated >= desired && total <= updated && available >= updated
}

/// Whether a daemonset has finished rolling out
pub fn daemonset_rolled_out(daemonset: &DaemonSet) -> bool {
    let Some(status) = daemonset.status.as_ref() else {
        return false;
    };

    let generation = daemonset.metadata.generation.unwrap_or(0);
    if status.observed_generation.unwrap_or(0) < generation {
        return false;
    }

    let desired = status.desired_number_scheduled;
    status.updated_number_scheduled.unwrap_or(0) >= desired
        && status.number_available.unwrap_or(0) >= desired
}

/// Whether a statefulset has finished rolling out
pub fn statefulset_rolled_out(statefulset: &StatefulSet) -> bool {
    let Some(status) = statefulset.status.as_ref() else {
        return false;
    };

    let generation = statefulset.metadata.generation.unwrap_or(0);
    if status.observed_generation.unwrap_or(0) < generation {
        return false;
    }

    let desired = statefulset
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);

    status.ready_replicas.unwrap_or(0) >= desired && status.updated_replicas.unwrap_or(0) >= desired
}

async fn get_opt<K>(client: &Client, namespace: &str, name: &str) -> Result<Option<K>, Error>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + std::fmt::Debug,
    <K as kube::Resource>::DynamicType: Default,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    Ok(api.get_opt(name).await?)
}

/// Whether a workload exists
pub async fn workload_exists(client: &Client, workload: &WorkloadRef<'_>) -> Result<bool, Error> {
    let (namespace, name) = (workload.namespace, workload.name);
    let exists = match workload.kind {
        WorkloadKind::Deployment => get_opt::<Deployment>(client, namespace, name)
            .await?
            .is_some(),
        WorkloadKind::DaemonSet => get_opt::<DaemonSet>(client, namespace, name)
            .await?
            .is_some(),
        WorkloadKind::StatefulSet => get_opt::<StatefulSet>(client, namespace, name)
            .await?
            .is_some(),
    };
    Ok(exists)
}

/// Rollout state of a workload, `None` if it does not exist
pub async fn rollout_status(
    client: &Client,
    workload: &WorkloadRef<'_>,
) -> Result<Option<bool>, Error> {
    let (namespace, name) = (workload.namespace, workload.name);
    let status = match workload.kind {
        WorkloadKind::Deployment => get_opt::<Deployment>(client, namespace, name)
            .await?
            .map(|d| deployment_rolled_out(&d)),
        WorkloadKind::DaemonSet => get_opt::<DaemonSet>(client, namespace, name)
            .await?
            .map(|d| daemonset_rolled_out(&d)),
        WorkloadKind::StatefulSet => get_opt::<StatefulSet>(client, namespace, name)
            .await?
            .map(|s| statefulset_rolled_out(&s)),
    };
    Ok(status)
}

/// Whether a workload exists and has finished rolling out
pub async fn workload_rolled_out(
    client: &Client,
    workload: &WorkloadRef<'_>,
) -> Result<bool, Error> {
    Ok(rollout_status(client, workload).await?.unwrap_or(false))
}

/// Rollout progress for a wait: a missing workload is an error, not "pending"
pub fn require_workload(workload: &WorkloadRef<'_>, status: Option<bool>) -> Result<bool, Error> {
    status.ok_or_else(|| {
        Error::internal_with_context("wait_for_rollout", format!("{} not found", workload))
    })
}

/// Wait for a workload to finish rolling out
///
/// Fails at once when the workload does not exist or the API rejects the
/// lookup, like `kubectl rollout status`.
pub async fn wait_for_rollout(
    client: &Client,
    workload: &WorkloadRef<'_>,
    timeout: Duration,
) -> Result<(), Error> {
    debug!(workload = %workload, "Waiting for rollout");

    poll_until(
        timeout,
        DEFAULT_POLL_INTERVAL,
        format!("Timeout waiting for {} to roll out", workload),
        move || async move {
            let status = rollout_status(client, workload).await?;
            require_workload(workload, status)
        },
    )
    .await
}

// =============================================================================
// Pods
// =============================================================================

/// Readiness of the pods matched by a selector
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodReadiness {
    /// Number of matching pods
    pub total: usize,
    /// Names of matching pods that are not Ready
    pub not_ready: Vec<String>,
}

impl PodReadiness {
    /// Summarise a pod list
    pub fn from_pods(pods: &[Pod]) -> Self {
        let not_ready = pods
            .iter()
            .filter(|pod| !pod_is_ready(pod))
            .map(|pod| pod.metadata.name.clone().unwrap_or_default())
            .collect();

        Self {
            total: pods.len(),
            not_ready,
        }
    }

    /// At least one pod matched and all of them are Ready
    pub fn all_ready(&self) -> bool {
        self.total > 0 && self.not_ready.is_empty()
    }
}

/// List pods by label selector and report their readiness
pub async fn pod_readiness(
    client: &Client,
    namespace: &str,
    label_selector: &str,
) -> Result<PodReadiness, Error> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let list = pods
        .list(&ListParams::default().labels(label_selector))
        .await?;
    Ok(PodReadiness::from_pods(&list.items))
}

// =============================================================================
// Manifests
// =============================================================================

/// Metadata extracted from a manifest
#[derive(Debug, Clone)]
pub struct ManifestMetadata {
    /// The full manifest as JSON
    pub value: serde_json::Value,
    /// Resource name
    pub name: String,
    /// Resource namespace (None for cluster-scoped)
    pub namespace: Option<String>,
    /// API resource definition
    pub api_resource: ApiResource,
}

/// Parse apiVersion into (group, version)
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Lowercase plural resource name for a kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with("ss") || lower.ends_with('x') {
        format!("{}es", lower)
    } else if let Some(stem) = lower
        .strip_suffix('y')
        .filter(|stem| !stem.ends_with(['a', 'e', 'i', 'o', 'u']))
    {
        format!("{}ies", stem)
    } else {
        format!("{}s", lower)
    }
}

/// Build an ApiResource from a known apiVersion and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Parse a single-document manifest and extract its metadata
pub fn parse_manifest(value: serde_json::Value) -> Result<ManifestMetadata, Error> {
    let api_version = value
        .get("apiVersion")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::internal_with_context("parse_manifest", "Manifest missing apiVersion"))?
        .to_string();

    let kind = value
        .get("kind")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::internal_with_context("parse_manifest", "Manifest missing kind"))?
        .to_string();

    let name = value
        .pointer("/metadata/name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            Error::internal_with_context("parse_manifest", "Manifest missing metadata.name")
        })?
        .to_string();

    let namespace = value
        .pointer("/metadata/namespace")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let api_resource = build_api_resource(&api_version, &kind);

    Ok(ManifestMetadata {
        value,
        name,
        namespace,
        api_resource,
    })
}

/// Split multi-document YAML into manifests, skipping empty documents
pub fn split_manifests(yaml: &str) -> Result<Vec<ManifestMetadata>, Error> {
    let mut manifests = Vec::new();

    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = serde_json::Value::deserialize(document).map_err(|e| {
            Error::internal_with_context("split_manifests", format!("invalid YAML: {}", e))
        })?;
        if value.is_null() {
            continue;
        }
        manifests.push(parse_manifest(value)?);
    }

    Ok(manifests)
}

/// Apply a manifest using server-side apply
pub async fn apply_manifest(client: &Client, manifest: &ManifestMetadata) -> Result<(), Error> {
    let patch_params = PatchParams::apply(FIELD_MANAGER).force();

    let api: Api<DynamicObject> = match &manifest.namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, &manifest.api_resource),
        None => Api::all_with(client.clone(), &manifest.api_resource),
    };

    api.patch(&manifest.name, &patch_params, &Patch::Apply(&manifest.value))
        .await
        .map_err(|e| {
            Error::internal_with_context(
                "apply_manifest",
                format!(
                    "Failed to apply {}/{}: {}",
                    manifest.api_resource.kind, manifest.name, e
                ),
            )
        })?;

    Ok(())
}

/// Apply a multi-document YAML manifest (documents separated by ---)
pub async fn apply_manifests(client: &Client, yaml: &str) -> Result<usize, Error> {
    let manifests = split_manifests(yaml)?;
    for manifest in &manifests {
        apply_manifest(client, manifest).await?;
    }
    Ok(manifests.len())
}
