//! Step 7: upgrade Cilium to its post-migration configuration

use async_trait::async_trait;
use tracing::info;

use cni_migration_common::config::WorkloadKind;
use cni_migration_common::Result;

use super::checks::{check_knet_stress, ReleaseSettle};
use crate::context::MigrationContext;
use crate::helm::{repo_name, ChartSpec};
use crate::pipeline::Step;

/// Upgrades the Cilium release with the post-migration values
pub struct Update {
    ctx: MigrationContext,
    settle: ReleaseSettle,
}

impl Update {
    pub fn new(ctx: MigrationContext) -> Self {
        Self {
            ctx,
            settle: ReleaseSettle::default(),
        }
    }
}

#[async_trait]
impl Step for Update {
    async fn ready(&self) -> Result<bool> {
        let release_name = &self.ctx.config.cilium.release_name;
        let Some(release) = self.ctx.helm.get_release(release_name).await? else {
            info!(release = %release_name, "cilium release not installed");
            return Ok(false);
        };

        if release.status.is_pending() {
            info!(release = %release.name, status = ?release.status, "cilium release pending");
            return Ok(false);
        }

        info!(release = %release.name, revision = release.revision, "update ready");
        Ok(true)
    }

    async fn run(&self, dry_run: bool) -> Result<()> {
        let config = &self.ctx.config;
        let cilium = &config.cilium;

        self.ctx
            .helm
            .add_or_update_repo(repo_name(&cilium.chart_name), &cilium.repo_path)
            .await?;

        let spec = ChartSpec::cilium(cilium, &config.paths.cilium_post_migration, dry_run);
        info!(release = %spec.release_name, version = %spec.version, dry_run, "upgrading cilium");
        self.ctx.helm.upgrade(&spec).await?;

        if dry_run {
            return Ok(());
        }

        self.settle.wait(&self.ctx, &spec.release_name).await?;

        info!(daemonset = %spec.release_name, "waiting for cilium agents");
        self.ctx
            .cluster
            .wait_for_rollout(WorkloadKind::DaemonSet, &spec.namespace, &spec.release_name)
            .await?;
        check_knet_stress(&self.ctx).await?;

        info!(release = %spec.release_name, namespace = %spec.namespace, "cilium upgraded");
        Ok(())
    }
}
