//! Kubernetes operations used by the migration steps
//!
//! Steps talk to the cluster only through [`ClusterClient`] so their
//! decision logic can be tested against mocks.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use cni_migration_common::config::{WorkloadKind, WorkloadRef};
use cni_migration_common::kube_utils::{self, PodReadiness, DEFAULT_ROLLOUT_TIMEOUT};
use cni_migration_common::{Error, Result};

/// Name and labels of a node
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeLabels {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

/// Labels to set and remove on a node in one patch
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelPatch {
    pub set: BTreeMap<String, String>,
    pub remove: Vec<String>,
}

impl LabelPatch {
    /// JSON merge patch body; removed keys are sent as null
    pub fn to_merge_patch(&self) -> serde_json::Value {
        let mut labels = serde_json::Map::new();
        for key in &self.remove {
            labels.insert(key.clone(), serde_json::Value::Null);
        }
        for (key, value) in &self.set {
            labels.insert(key.clone(), json!(value));
        }
        json!({ "metadata": { "labels": labels } })
    }
}

/// Desired and observed replica counts from a scale subresource
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScaleState {
    pub desired: i32,
    pub current: i32,
}

/// The parts of a daemonset the steps look at
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DaemonSetState {
    pub node_selector: BTreeMap<String, String>,
    pub number_ready: i32,
}

/// Trait abstracting the Kubernetes operations the steps perform
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List every node with its labels
    async fn list_nodes(&self) -> Result<Vec<NodeLabels>>;

    /// Set and remove labels on a node
    async fn patch_node_labels(&self, node: &str, patch: LabelPatch) -> Result<()>;

    /// Read a deployment's scale subresource
    async fn get_deployment_scale(&self, namespace: &str, name: &str) -> Result<ScaleState>;

    /// Set a deployment's desired replicas
    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()>;

    /// Read a daemonset, `None` if it does not exist
    async fn get_daemonset(&self, namespace: &str, name: &str) -> Result<Option<DaemonSetState>>;

    /// Add a key to a daemonset's pod template node selector
    async fn set_daemonset_node_selector(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<()>;

    /// Delete a daemonset; deleting a missing daemonset succeeds
    async fn delete_daemonset(&self, namespace: &str, name: &str) -> Result<()>;

    /// Whether a workload exists
    async fn workload_exists(&self, kind: WorkloadKind, namespace: &str, name: &str)
        -> Result<bool>;

    /// Whether a workload exists and has finished rolling out
    async fn workload_rolled_out(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<bool>;

    /// Block until a workload has rolled out
    async fn wait_for_rollout(&self, kind: WorkloadKind, namespace: &str, name: &str)
        -> Result<()>;

    /// Readiness of the pods matching a label selector
    async fn pod_readiness(&self, namespace: &str, label_selector: &str) -> Result<PodReadiness>;

    /// Server-side apply a multi-document manifest, returning the object count
    async fn apply_manifests(&self, yaml: &str) -> Result<usize>;
}

/// Real Kubernetes client implementation
pub struct KubeClusterClient {
    client: Client,
    cancel: CancellationToken,
}

impl KubeClusterClient {
    /// Wrap a kube client; rollout waits stop when `cancel` fires
    pub fn new(client: Client, cancel: CancellationToken) -> Self {
        Self { client, cancel }
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn daemonsets(&self, namespace: &str) -> Api<DaemonSet> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_nodes(&self) -> Result<Vec<NodeLabels>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;

        Ok(list
            .items
            .into_iter()
            .map(|node| NodeLabels {
                name: node.metadata.name.unwrap_or_default(),
                labels: node.metadata.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn patch_node_labels(&self, node: &str, patch: LabelPatch) -> Result<()> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        nodes
            .patch(
                node,
                &PatchParams::default(),
                &Patch::Merge(&patch.to_merge_patch()),
            )
            .await?;
        Ok(())
    }

    async fn get_deployment_scale(&self, namespace: &str, name: &str) -> Result<ScaleState> {
        let scale = self.deployments(namespace).get_scale(name).await?;

        Ok(ScaleState {
            desired: scale.spec.and_then(|s| s.replicas).unwrap_or(0),
            current: scale.status.map(|s| s.replicas).unwrap_or(0),
        })
    }

    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        let patch = json!({ "spec": { "replicas": replicas } });
        self.deployments(namespace)
            .patch_scale(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_daemonset(&self, namespace: &str, name: &str) -> Result<Option<DaemonSetState>> {
        let daemonset = self.daemonsets(namespace).get_opt(name).await?;

        Ok(daemonset.map(|ds| DaemonSetState {
            node_selector: ds
                .spec
                .and_then(|s| s.template.spec)
                .and_then(|s| s.node_selector)
                .unwrap_or_default(),
            number_ready: ds.status.map(|s| s.number_ready).unwrap_or(0),
        }))
    }

    async fn set_daemonset_node_selector(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let patch = json!({
            "spec": { "template": { "spec": { "nodeSelector": { key: value } } } }
        });
        self.daemonsets(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete_daemonset(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .daemonsets(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(Error::from)
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(namespace, name, "daemonset already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn workload_exists(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<bool> {
        let workload = WorkloadRef {
            kind,
            namespace,
            name,
        };
        kube_utils::workload_exists(&self.client, &workload).await
    }

    async fn workload_rolled_out(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<bool> {
        let workload = WorkloadRef {
            kind,
            namespace,
            name,
        };
        kube_utils::workload_rolled_out(&self.client, &workload).await
    }

    async fn wait_for_rollout(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<()> {
        let workload = WorkloadRef {
            kind,
            namespace,
            name,
        };

        tokio::select! {
            result = kube_utils::wait_for_rollout(&self.client, &workload, DEFAULT_ROLLOUT_TIMEOUT) => result,
            _ = self.cancel.cancelled() => Err(Error::cancelled(format!("rollout of {}", workload))),
        }
    }

    async fn pod_readiness(&self, namespace: &str, label_selector: &str) -> Result<PodReadiness> {
        kube_utils::pod_readiness(&self.client, namespace, label_selector).await
    }

    async fn apply_manifests(&self, yaml: &str) -> Result<usize> {
        kube_utils::apply_manifests(&self.client, yaml).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_patch_nulls_removed_keys() {
        let patch = LabelPatch {
            set: BTreeMap::from([("role/aws-vpc-cni".to_string(), "true".to_string())]),
            remove: vec!["role/cilium".to_string()],
        };

        assert_eq!(
            patch.to_merge_patch(),
            json!({
                "metadata": {
                    "labels": {
                        "role/aws-vpc-cni": "true",
                        "role/cilium": null
                    }
                }
            })
        );
    }
}
