//! Step 3: pin aws-node to nodes carrying the AWS VPC CNI role label

use async_trait::async_trait;
use tracing::info;

use cni_migration_common::{Error, Result};

use super::checks::{all_exist, check_knet_stress, wait_all_rolled_out};
use crate::cluster::DaemonSetState;
use crate::context::MigrationContext;
use crate::pipeline::Step;

/// Adds the AWS VPC CNI role label to the aws-node node selector
pub struct Priority {
    ctx: MigrationContext,
}

impl Priority {
    pub fn new(ctx: MigrationContext) -> Self {
        Self { ctx }
    }

    fn is_pinned(&self, daemonset: &DaemonSetState) -> bool {
        let labels = &self.ctx.config.labels;
        daemonset.node_selector.get(&labels.aws_vpc_cni) == Some(&labels.value)
    }

    async fn aws_node(&self) -> Result<Option<DaemonSetState>> {
        let aws = &self.ctx.config.aws_vpc_cni;
        self.ctx
            .cluster
            .get_daemonset(&aws.namespace, &aws.daemonset_name)
            .await
    }
}

#[async_trait]
impl Step for Priority {
    async fn ready(&self) -> Result<bool> {
        match self.aws_node().await? {
            Some(ds) if self.is_pinned(&ds) => {}
            _ => {
                info!("aws-node node selector not set");
                return Ok(false);
            }
        }

        if !all_exist(&self.ctx, &self.ctx.config.watched_resources).await? {
            return Ok(false);
        }

        info!("priority ready");
        Ok(true)
    }

    async fn run(&self, dry_run: bool) -> Result<()> {
        let config = &self.ctx.config;

        if !dry_run {
            check_knet_stress(&self.ctx).await?;
        }

        let daemonset = self.aws_node().await?.ok_or_else(|| {
            Error::internal_with_context(
                "priority",
                format!(
                    "daemonset {}/{} not found",
                    config.aws_vpc_cni.namespace, config.aws_vpc_cni.daemonset_name
                ),
            )
        })?;

        if self.is_pinned(&daemonset) {
            info!("aws-node node selector already set");
        } else if dry_run {
            info!(
                key = %config.labels.aws_vpc_cni,
                value = %config.labels.value,
                "would patch aws-node node selector"
            );
        } else {
            self.ctx
                .cluster
                .set_daemonset_node_selector(
                    &config.aws_vpc_cni.namespace,
                    &config.aws_vpc_cni.daemonset_name,
                    &config.labels.aws_vpc_cni,
                    &config.labels.value,
                )
                .await?;
            info!(
                key = %config.labels.aws_vpc_cni,
                value = %config.labels.value,
                "patched aws-node node selector"
            );
        }

        if !dry_run {
            wait_all_rolled_out(&self.ctx, &config.watched_resources).await?;
            check_knet_stress(&self.ctx).await?;
        }
        Ok(())
    }
}
