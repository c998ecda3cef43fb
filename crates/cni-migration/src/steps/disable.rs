//! Step 1: scale the cluster autoscaler down for the migration

use async_trait::async_trait;
use tracing::info;

use cni_migration_common::Result;

use super::checks::check_knet_stress;
use crate::context::MigrationContext;
use crate::pipeline::Step;

/// Scales the cluster autoscaler to zero so nodes are not replaced mid-migration
pub struct Disable {
    ctx: MigrationContext,
}

impl Disable {
    pub fn new(ctx: MigrationContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Step for Disable {
    async fn ready(&self) -> Result<bool> {
        let autoscaler = &self.ctx.config.cluster_autoscaler;
        let scale = self
            .ctx
            .cluster
            .get_deployment_scale(&autoscaler.namespace, &autoscaler.deployment_name)
            .await?;

        if scale.desired != 0 {
            info!(replicas = scale.desired, "cluster autoscaler still scaled up");
            return Ok(false);
        }
        check_knet_stress(&self.ctx).await?;

        info!("disable ready");
        Ok(true)
    }

    async fn run(&self, dry_run: bool) -> Result<()> {
        let autoscaler = &self.ctx.config.cluster_autoscaler;
        let scale = self
            .ctx
            .cluster
            .get_deployment_scale(&autoscaler.namespace, &autoscaler.deployment_name)
            .await?;

        if scale.desired == 0 {
            info!("cluster autoscaler already scaled to 0");
        } else if dry_run {
            info!(from = scale.desired, "would scale cluster autoscaler to 0");
        } else {
            self.ctx
                .cluster
                .scale_deployment(&autoscaler.namespace, &autoscaler.deployment_name, 0)
                .await?;
            info!(from = scale.desired, "cluster autoscaler scaled to 0");
        }

        check_knet_stress(&self.ctx).await
    }
}
