//! Step 9: bring the cluster autoscaler back

use async_trait::async_trait;
use tracing::info;

use cni_migration_common::config::WorkloadKind;
use cni_migration_common::Result;

use super::checks::check_knet_stress;
use crate::context::MigrationContext;
use crate::pipeline::Step;

/// Scales the cluster autoscaler back to its configured replica count
pub struct Enable {
    ctx: MigrationContext,
}

impl Enable {
    pub fn new(ctx: MigrationContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Step for Enable {
    async fn ready(&self) -> Result<bool> {
        let autoscaler = &self.ctx.config.cluster_autoscaler;
        let scale = self
            .ctx
            .cluster
            .get_deployment_scale(&autoscaler.namespace, &autoscaler.deployment_name)
            .await?;

        if scale.desired == 0 {
            info!("cluster autoscaler still scaled to 0");
            return Ok(false);
        }
        check_knet_stress(&self.ctx).await?;

        info!(replicas = scale.desired, "enable ready");
        Ok(true)
    }

    async fn run(&self, dry_run: bool) -> Result<()> {
        let autoscaler = &self.ctx.config.cluster_autoscaler;
        let scale = self
            .ctx
            .cluster
            .get_deployment_scale(&autoscaler.namespace, &autoscaler.deployment_name)
            .await?;

        if scale.desired > 0 && scale.current > 0 {
            info!(replicas = scale.current, "cluster autoscaler already scaled up");
            return Ok(());
        }

        if dry_run {
            info!(replicas = autoscaler.replicas, "would scale cluster autoscaler up");
            return check_knet_stress(&self.ctx).await;
        }

        self.ctx
            .cluster
            .scale_deployment(
                &autoscaler.namespace,
                &autoscaler.deployment_name,
                autoscaler.replicas,
            )
            .await?;
        self.ctx
            .cluster
            .wait_for_rollout(
                WorkloadKind::Deployment,
                &autoscaler.namespace,
                &autoscaler.deployment_name,
            )
            .await?;
        check_knet_stress(&self.ctx).await?;

        info!(replicas = autoscaler.replicas, "cluster autoscaler scaled up");
        Ok(())
    }
}
