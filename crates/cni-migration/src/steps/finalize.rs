//! Step 8: drop the Cilium role label from every node

use async_trait::async_trait;
use tracing::info;

use cni_migration_common::Result;

use super::checks::check_knet_stress;
use crate::cluster::LabelPatch;
use crate::context::MigrationContext;
use crate::pipeline::Step;

/// Removes the Cilium role label once every node runs Cilium
pub struct Finalize {
    ctx: MigrationContext,
}

impl Finalize {
    pub fn new(ctx: MigrationContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Step for Finalize {
    async fn ready(&self) -> Result<bool> {
        let cilium_label = &self.ctx.config.labels.cilium;
        let nodes = self.ctx.cluster.list_nodes().await?;

        if let Some(node) = nodes.iter().find(|n| n.labels.contains_key(cilium_label)) {
            info!(node = %node.name, "node still carries cilium role label");
            return Ok(false);
        }

        info!("finalize ready");
        Ok(true)
    }

    async fn run(&self, dry_run: bool) -> Result<()> {
        let cilium_label = &self.ctx.config.labels.cilium;
        let nodes = self.ctx.cluster.list_nodes().await?;

        for node in nodes.iter().filter(|n| n.labels.contains_key(cilium_label)) {
            if dry_run {
                info!(node = %node.name, "would remove cilium role label");
                continue;
            }

            let patch = LabelPatch {
                remove: vec![cilium_label.clone()],
                ..Default::default()
            };
            self.ctx
                .cluster
                .patch_node_labels(&node.name, patch)
                .await?;
            info!(node = %node.name, "removed cilium role label");
        }

        if !dry_run {
            check_knet_stress(&self.ctx).await?;
        }
        Ok(())
    }
}
