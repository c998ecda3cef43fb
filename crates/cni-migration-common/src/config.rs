//! Migration config file
//!
//! The config file names every cluster object the steps touch: the node
//! role labels, the aws-node daemonset, the cluster autoscaler, the Cilium
//! helm release and the workloads that must stay healthy throughout.
//! Unknown keys are rejected so a typo never silently falls back to a default.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Default namespace of the knet-stress connectivity probes
pub const DEFAULT_KNET_STRESS_NAMESPACE: &str = "knet-stress";
/// Default label selector of the knet-stress connectivity probes
pub const DEFAULT_KNET_STRESS_SELECTOR: &str = "app=knet-stress";

/// Root of the migration config file
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Node role labels
    pub labels: Labels,
    /// Files read by the steps
    pub paths: Paths,
    /// The AWS VPC CNI daemonset being replaced
    pub aws_vpc_cni: AwsVpcCni,
    /// The cluster autoscaler paused for the duration of the migration
    pub cluster_autoscaler: ClusterAutoscaler,
    /// The Cilium helm release
    pub cilium: Cilium,
    /// Workloads that make up the knet-stress preflight install
    #[serde(default)]
    pub preflight_resources: Resources,
    /// Workloads that must stay healthy while aws-node is re-scheduled
    #[serde(default)]
    pub watched_resources: Resources,
    /// Where the knet-stress probes run
    #[serde(default)]
    pub knet_stress: KnetStress,
    /// Leftover AWS VPC CNI workloads; accepted so existing config files
    /// load, not acted on by any step
    #[serde(default)]
    pub clean_up_resources: Resources,
}

/// Node role labels
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Labels {
    /// Label key marking nodes that still run AWS VPC CNI
    #[serde(rename = "aws-vpc-cni")]
    pub aws_vpc_cni: String,
    /// Label key marking nodes that run Cilium
    pub cilium: String,
    /// Value used for both label keys
    pub value: String,
}

/// Paths to manifests and helm values
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Paths {
    /// knet-stress manifest applied by the preflight step
    pub knet_stress: PathBuf,
    /// Helm values for the initial Cilium install
    pub cilium_pre_migration: PathBuf,
    /// Helm values for the final Cilium upgrade
    pub cilium_post_migration: PathBuf,
}

/// The aws-node daemonset
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AwsVpcCni {
    /// Namespace of the daemonset
    pub namespace: String,
    /// Name of the daemonset
    pub daemonset_name: String,
}

/// The cluster autoscaler deployment
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClusterAutoscaler {
    /// Namespace of the deployment
    pub namespace: String,
    /// Name of the deployment
    pub deployment_name: String,
    /// Replica count restored once the migration is done
    #[serde(default = "default_autoscaler_replicas")]
    pub replicas: i32,
}

fn default_autoscaler_replicas() -> i32 {
    1
}

/// The Cilium helm release
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Cilium {
    /// Helm release name; the agent daemonset carries the same name
    pub release_name: String,
    /// Chart reference, e.g. `cilium/cilium`
    pub chart_name: String,
    /// Chart repository URL
    pub repo_path: String,
    /// Chart version
    pub version: String,
    /// Release namespace
    pub namespace: String,
}

/// knet-stress probe location
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KnetStress {
    /// Namespace the probes run in
    #[serde(default = "default_knet_namespace")]
    pub namespace: String,
    /// Label selector matching every probe pod
    #[serde(default = "default_knet_selector")]
    pub label_selector: String,
}

fn default_knet_namespace() -> String {
    DEFAULT_KNET_STRESS_NAMESPACE.to_string()
}

fn default_knet_selector() -> String {
    DEFAULT_KNET_STRESS_SELECTOR.to_string()
}

impl Default for KnetStress {
    fn default() -> Self {
        Self {
            namespace: default_knet_namespace(),
            label_selector: default_knet_selector(),
        }
    }
}

/// Kind of a workload referenced from the config
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WorkloadKind {
    /// apps/v1 Deployment
    Deployment,
    /// apps/v1 DaemonSet
    DaemonSet,
    /// apps/v1 StatefulSet
    StatefulSet,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deployment => write!(f, "deployment"),
            Self::DaemonSet => write!(f, "daemonset"),
            Self::StatefulSet => write!(f, "statefulset"),
        }
    }
}

/// A single workload reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadRef<'a> {
    /// Workload kind
    pub kind: WorkloadKind,
    /// Namespace
    pub namespace: &'a str,
    /// Name
    pub name: &'a str,
}

impl fmt::Display for WorkloadRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Workloads grouped by kind, then namespace
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Resources {
    /// Daemonset names per namespace
    #[serde(default)]
    pub daemonsets: BTreeMap<String, Vec<String>>,
    /// Deployment names per namespace
    #[serde(default)]
    pub deployments: BTreeMap<String, Vec<String>>,
    /// Statefulset names per namespace
    #[serde(default)]
    pub statefulsets: BTreeMap<String, Vec<String>>,
}

impl Resources {
    /// All workloads: deployments first, then daemonsets, then statefulsets
    pub fn workloads(&self) -> Vec<WorkloadRef<'_>> {
        let groups = [
            (WorkloadKind::Deployment, &self.deployments),
            (WorkloadKind::DaemonSet, &self.daemonsets),
            (WorkloadKind::StatefulSet, &self.statefulsets),
        ];

        groups
            .into_iter()
            .flat_map(|(kind, by_namespace)| {
                by_namespace.iter().flat_map(move |(namespace, names)| {
                    names.iter().map(move |name| WorkloadRef {
                        kind,
                        namespace,
                        name,
                    })
                })
            })
            .collect()
    }
}

impl Config {
    /// Read, parse and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::config(path, format!("failed to read: {}", e)))?;
        let config = Self::parse(&data).map_err(|e| Error::config(path, e))?;
        Ok(config)
    }

    /// Parse and validate config YAML
    pub fn parse(yaml: &str) -> std::result::Result<Self, String> {
        let config: Config =
            serde_yaml::from_str(yaml).map_err(|e| format!("failed to parse: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let required = [
            ("labels.aws-vpc-cni", &self.labels.aws_vpc_cni),
            ("labels.cilium", &self.labels.cilium),
            ("labels.value", &self.labels.value),
            ("awsVpcCni.namespace", &self.aws_vpc_cni.namespace),
            ("awsVpcCni.daemonsetName", &self.aws_vpc_cni.daemonset_name),
            ("clusterAutoscaler.namespace", &self.cluster_autoscaler.namespace),
            (
                "clusterAutoscaler.deploymentName",
                &self.cluster_autoscaler.deployment_name,
            ),
            ("cilium.release-name", &self.cilium.release_name),
            ("cilium.chart-name", &self.cilium.chart_name),
            ("cilium.repo-path", &self.cilium.repo_path),
            ("cilium.namespace", &self.cilium.namespace),
            ("knetStress.namespace", &self.knet_stress.namespace),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(format!("{} must not be empty", field));
            }
        }

        if self.labels.aws_vpc_cni == self.labels.cilium {
            return Err("labels.aws-vpc-cni and labels.cilium must differ".to_string());
        }

        if self.cluster_autoscaler.replicas < 1 {
            return Err(format!(
                "clusterAutoscaler.replicas must be at least 1, got {}",
                self.cluster_autoscaler.replicas
            ));
        }

        Ok(())
    }
}
