//! Step 5: delete the aws-node daemonset

use async_trait::async_trait;
use tracing::info;

use cni_migration_common::Result;

use crate::context::MigrationContext;
use crate::pipeline::Step;

/// Removes the AWS VPC CNI daemonset
pub struct Delete {
    ctx: MigrationContext,
}

impl Delete {
    pub fn new(ctx: MigrationContext) -> Self {
        Self { ctx }
    }

    /// aws-node counts as present only while it has ready pods
    async fn aws_node_running(&self) -> Result<bool> {
        let aws = &self.ctx.config.aws_vpc_cni;
        let daemonset = self
            .ctx
            .cluster
            .get_daemonset(&aws.namespace, &aws.daemonset_name)
            .await?;
        Ok(daemonset.is_some_and(|ds| ds.number_ready > 0))
    }
}

#[async_trait]
impl Step for Delete {
    async fn ready(&self) -> Result<bool> {
        let running = self.aws_node_running().await?;
        if !running {
            info!("delete ready");
        }
        Ok(!running)
    }

    async fn run(&self, dry_run: bool) -> Result<()> {
        let aws = &self.ctx.config.aws_vpc_cni;

        if !self.aws_node_running().await? {
            info!("aws-node already removed");
            return Ok(());
        }

        if dry_run {
            info!(namespace = %aws.namespace, name = %aws.daemonset_name, "would delete aws-node daemonset");
            return Ok(());
        }

        self.ctx
            .cluster
            .delete_daemonset(&aws.namespace, &aws.daemonset_name)
            .await?;
        info!(namespace = %aws.namespace, name = %aws.daemonset_name, "aws-node daemonset deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{DaemonSetState, MockClusterClient};
    use crate::helm::MockHelmClient;
    use crate::steps::test_support::context;
    use mockall::predicate::*;

    fn with_ready_pods(number_ready: i32) -> Option<DaemonSetState> {
        Some(DaemonSetState {
            number_ready,
            ..Default::default()
        })
    }

    // ==========================================================================
    // Story: Readiness
    // ==========================================================================

    #[tokio::test]
    async fn when_daemonset_gone_step_is_ready() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_get_daemonset()
            .with(eq("kube-system"), eq("aws-node"))
            .returning(|_, _| Ok(None));

        let step = Delete::new(context(cluster, MockHelmClient::new()));
        assert!(step.ready().await.expect("ready check runs"));
    }

    #[tokio::test]
    async fn when_daemonset_has_no_ready_pods_step_is_ready() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_get_daemonset()
            .returning(|_, _| Ok(with_ready_pods(0)));

        let step = Delete::new(context(cluster, MockHelmClient::new()));
        assert!(step.ready().await.expect("ready check runs"));
    }

    #[tokio::test]
    async fn when_daemonset_running_step_is_not_ready() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_get_daemonset()
            .returning(|_, _| Ok(with_ready_pods(4)));

        let step = Delete::new(context(cluster, MockHelmClient::new()));
        assert!(!step.ready().await.expect("ready check runs"));
    }

    // ==========================================================================
    // Story: Run
    // ==========================================================================

    #[tokio::test]
    async fn live_run_deletes_running_daemonset() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_get_daemonset()
            .returning(|_, _| Ok(with_ready_pods(4)));
        cluster
            .expect_delete_daemonset()
            .with(eq("kube-system"), eq("aws-node"))
            .times(1)
            .returning(|_, _| Ok(()));

        let step = Delete::new(context(cluster, MockHelmClient::new()));
        assert!(step.run(false).await.is_ok());
    }

    #[tokio::test]
    async fn dry_run_never_deletes() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_get_daemonset()
            .returning(|_, _| Ok(with_ready_pods(4)));
        cluster.expect_delete_daemonset().never();

        let step = Delete::new(context(cluster, MockHelmClient::new()));
        assert!(step.run(true).await.is_ok());
    }

    #[tokio::test]
    async fn second_live_run_is_a_no_op() {
        let mut cluster = MockClusterClient::new();
        cluster.expect_get_daemonset().returning(|_, _| Ok(None));
        cluster.expect_delete_daemonset().never();

        let step = Delete::new(context(cluster, MockHelmClient::new()));
        assert!(step.run(false).await.is_ok());
    }
}
