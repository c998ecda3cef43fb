//! Fixtures for step tests

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use cni_migration_common::kube_utils::PodReadiness;
use cni_migration_common::Config;

use crate::cluster::{MockClusterClient, NodeLabels};
use crate::context::MigrationContext;
use crate::helm::{MockHelmClient, Release, ReleaseStatus};

pub(crate) const CONFIG: &str = r#"
labels:
  aws-vpc-cni: node-role.kubernetes.io/aws-vpc-cni
  cilium: node-role.kubernetes.io/cilium
  value: "true"
paths:
  knet-stress: /nonexistent/knet-stress.yaml
  cilium-pre-migration: values/pre.yaml
  cilium-post-migration: values/post.yaml
awsVpcCni:
  namespace: kube-system
  daemonsetName: aws-node
clusterAutoscaler:
  namespace: kube-system
  deploymentName: cluster-autoscaler
  replicas: 2
cilium:
  release-name: cilium
  chart-name: cilium/cilium
  repo-path: https://helm.cilium.io/
  version: 1.16.5
  namespace: kube-system
preflightResources:
  daemonsets:
    knet-stress:
      - knet-stress
watchedResources:
  deployments:
    kube-system:
      - coredns
  daemonsets:
    kube-system:
      - kube-proxy
"#;

pub(crate) const AWS_LABEL: &str = "node-role.kubernetes.io/aws-vpc-cni";
pub(crate) const CILIUM_LABEL: &str = "node-role.kubernetes.io/cilium";

pub(crate) fn config() -> Config {
    Config::parse(CONFIG).expect("fixture config is valid")
}

pub(crate) fn context(cluster: MockClusterClient, helm: MockHelmClient) -> MigrationContext {
    context_with(config(), cluster, helm)
}

pub(crate) fn context_with(
    config: Config,
    cluster: MockClusterClient,
    helm: MockHelmClient,
) -> MigrationContext {
    MigrationContext::new(
        config,
        Arc::new(cluster),
        Arc::new(helm),
        CancellationToken::new(),
    )
}

pub(crate) fn release(status: ReleaseStatus) -> Release {
    Release {
        name: "cilium".to_string(),
        namespace: "kube-system".to_string(),
        revision: 1,
        status,
    }
}

pub(crate) fn node(name: &str, labels: &[&str]) -> NodeLabels {
    NodeLabels {
        name: name.to_string(),
        labels: labels
            .iter()
            .map(|key| (key.to_string(), "true".to_string()))
            .collect(),
    }
}

/// Expect `times` knet-stress checks that all pass
pub(crate) fn knet_healthy(cluster: &mut MockClusterClient, times: usize) {
    cluster
        .expect_pod_readiness()
        .times(times)
        .returning(|_, _| {
            Ok(PodReadiness {
                total: 2,
                not_ready: Vec::new(),
            })
        });
}

/// Expect knet-stress checks that report an unready pod
pub(crate) fn knet_broken(cluster: &mut MockClusterClient) {
    cluster.expect_pod_readiness().returning(|_, _| {
        Ok(PodReadiness {
            total: 2,
            not_ready: vec!["knet-stress-x7k2p".to_string()],
        })
    });
}
