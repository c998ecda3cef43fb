//! Step 4: install Cilium next to AWS VPC CNI

use async_trait::async_trait;
use tracing::info;

use cni_migration_common::Result;

use super::checks::{check_knet_stress, ReleaseSettle};
use crate::context::MigrationContext;
use crate::helm::{repo_name, ChartSpec};
use crate::pipeline::Step;

/// Installs the Cilium release with the pre-migration values
pub struct Deploy {
    ctx: MigrationContext,
    settle: ReleaseSettle,
}

impl Deploy {
    pub fn new(ctx: MigrationContext) -> Self {
        Self {
            ctx,
            settle: ReleaseSettle::default(),
        }
    }
}

#[async_trait]
impl Step for Deploy {
    async fn ready(&self) -> Result<bool> {
        let release_name = &self.ctx.config.cilium.release_name;
        match self.ctx.helm.get_release(release_name).await? {
            Some(release) => {
                info!(release = %release.name, revision = release.revision, "deploy ready");
                Ok(true)
            }
            None => {
                info!(release = %release_name, "cilium release not installed");
                Ok(false)
            }
        }
    }

    async fn run(&self, dry_run: bool) -> Result<()> {
        let config = &self.ctx.config;
        let cilium = &config.cilium;

        if self.ctx.helm.get_release(&cilium.release_name).await?.is_some() {
            info!(release = %cilium.release_name, "cilium already deployed, skipping");
            return Ok(());
        }

        self.ctx
            .helm
            .add_or_update_repo(repo_name(&cilium.chart_name), &cilium.repo_path)
            .await?;

        let spec = ChartSpec::cilium(cilium, &config.paths.cilium_pre_migration, dry_run);
        info!(release = %spec.release_name, version = %spec.version, dry_run, "installing cilium");
        self.ctx.helm.install_or_upgrade(&spec).await?;

        if dry_run {
            return Ok(());
        }

        self.settle.wait(&self.ctx, &spec.release_name).await?;
        check_knet_stress(&self.ctx).await?;

        info!(release = %spec.release_name, namespace = %spec.namespace, "cilium deployed");
        Ok(())
    }
}
