//! Step 0: install the knet-stress probes and confirm the cluster is healthy

use async_trait::async_trait;
use tracing::info;

use cni_migration_common::kube_utils::split_manifests;
use cni_migration_common::{Error, Result};

use super::checks::{all_rolled_out, check_knet_stress, wait_all_rolled_out};
use crate::context::MigrationContext;
use crate::pipeline::Step;

/// Applies the knet-stress manifest and waits for the preflight workloads
pub struct Preflight {
    ctx: MigrationContext,
}

impl Preflight {
    pub fn new(ctx: MigrationContext) -> Self {
        Self { ctx }
    }

    async fn read_manifest(&self) -> Result<String> {
        let path = &self.ctx.config.paths.knet_stress;
        tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::internal_with_context(
                "preflight",
                format!("failed to read knet-stress manifest {}: {}", path.display(), e),
            )
        })
    }
}

#[async_trait]
impl Step for Preflight {
    async fn ready(&self) -> Result<bool> {
        if !all_rolled_out(&self.ctx, &self.ctx.config.preflight_resources).await? {
            return Ok(false);
        }
        check_knet_stress(&self.ctx).await?;

        info!("preflight ready");
        Ok(true)
    }

    async fn run(&self, dry_run: bool) -> Result<()> {
        let manifest = self.read_manifest().await?;
        let resources = &self.ctx.config.preflight_resources;

        if dry_run {
            let objects = split_manifests(&manifest)?.len();
            info!(objects, "would apply knet-stress manifest");
            for workload in resources.workloads() {
                info!(workload = %workload, "would wait for rollout");
            }
            return Ok(());
        }

        let applied = self.ctx.cluster.apply_manifests(&manifest).await?;
        info!(objects = applied, "applied knet-stress manifest");

        wait_all_rolled_out(&self.ctx, resources).await?;
        check_knet_stress(&self.ctx).await?;

        info!("preflight complete");
        Ok(())
    }
}
