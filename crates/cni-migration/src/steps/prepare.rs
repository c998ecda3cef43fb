//! Step 2: give every node exactly one CNI role label

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::info;

use cni_migration_common::config::Labels;
use cni_migration_common::Result;

use super::checks::check_knet_stress;
use crate::cluster::LabelPatch;
use crate::context::MigrationContext;
use crate::pipeline::Step;

/// Labels unlabelled or doubly-labelled nodes as AWS VPC CNI nodes
pub struct Prepare {
    ctx: MigrationContext,
}

impl Prepare {
    pub fn new(ctx: MigrationContext) -> Self {
        Self { ctx }
    }
}

/// A node is correctly labelled when it has exactly one of the two role keys
fn has_single_role(labels: &BTreeMap<String, String>, roles: &Labels) -> bool {
    labels.contains_key(&roles.aws_vpc_cni) != labels.contains_key(&roles.cilium)
}

#[async_trait]
impl Step for Prepare {
    async fn ready(&self) -> Result<bool> {
        let roles = &self.ctx.config.labels;
        let nodes = self.ctx.cluster.list_nodes().await?;

        if let Some(node) = nodes.iter().find(|n| !has_single_role(&n.labels, roles)) {
            info!(node = %node.name, "node role labels incorrect");
            return Ok(false);
        }

        info!(nodes = nodes.len(), "prepare ready");
        Ok(true)
    }

    async fn run(&self, dry_run: bool) -> Result<()> {
        let roles = &self.ctx.config.labels;
        let nodes = self.ctx.cluster.list_nodes().await?;

        for node in nodes.iter().filter(|n| !has_single_role(&n.labels, roles)) {
            if dry_run {
                info!(node = %node.name, "would set aws-vpc-cni role label");
                continue;
            }

            let patch = LabelPatch {
                set: BTreeMap::from([(roles.aws_vpc_cni.clone(), roles.value.clone())]),
                remove: vec![roles.cilium.clone()],
            };
            self.ctx
                .cluster
                .patch_node_labels(&node.name, patch)
                .await?;
            info!(node = %node.name, "set aws-vpc-cni role label");
        }

        if !dry_run {
            check_knet_stress(&self.ctx).await?;
        }
        Ok(())
    }
}
