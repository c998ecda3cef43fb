//! Checks and waits shared by several steps

use std::time::Duration;

use tracing::{debug, info, warn};

use cni_migration_common::config::Resources;
use cni_migration_common::{Error, Result};

use crate::context::MigrationContext;

/// Verify every knet-stress probe pod is Ready
pub(crate) async fn check_knet_stress(ctx: &MigrationContext) -> Result<()> {
    let knet = &ctx.config.knet_stress;
    let readiness = ctx
        .cluster
        .pod_readiness(&knet.namespace, &knet.label_selector)
        .await?;

    if readiness.all_ready() {
        debug!(pods = readiness.total, "knet-stress healthy");
        return Ok(());
    }

    if readiness.total == 0 {
        return Err(Error::connectivity(format!(
            "no knet-stress pods match '{}' in namespace {}",
            knet.label_selector, knet.namespace
        )));
    }
    Err(Error::connectivity(format!(
        "{} of {} knet-stress pods not ready: {}",
        readiness.not_ready.len(),
        readiness.total,
        readiness.not_ready.join(", ")
    )))
}

/// Whether every listed workload exists
pub(crate) async fn all_exist(ctx: &MigrationContext, resources: &Resources) -> Result<bool> {
    for workload in resources.workloads() {
        let exists = ctx
            .cluster
            .workload_exists(workload.kind, workload.namespace, workload.name)
            .await?;
        if !exists {
            info!(workload = %workload, "workload missing");
            return Ok(false);
        }
    }
    Ok(true)
}

/// Whether every listed workload exists and has rolled out
pub(crate) async fn all_rolled_out(ctx: &MigrationContext, resources: &Resources) -> Result<bool> {
    for workload in resources.workloads() {
        let rolled_out = ctx
            .cluster
            .workload_rolled_out(workload.kind, workload.namespace, workload.name)
            .await?;
        if !rolled_out {
            info!(workload = %workload, "workload not rolled out");
            return Ok(false);
        }
    }
    Ok(true)
}

/// Wait for every listed workload to roll out, one at a time
pub(crate) async fn wait_all_rolled_out(ctx: &MigrationContext, resources: &Resources) -> Result<()> {
    for workload in resources.workloads() {
        info!(workload = %workload, "waiting for rollout");
        ctx.cluster
            .wait_for_rollout(workload.kind, workload.namespace, workload.name)
            .await?;
    }
    Ok(())
}

/// How long to wait for a helm release to leave its pending state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReleaseSettle {
    pub attempts: usize,
    pub interval: Duration,
}

impl Default for ReleaseSettle {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_secs(1),
        }
    }
}

impl ReleaseSettle {
    /// Poll the release until it is no longer pending or attempts run out
    ///
    /// Running out of attempts is not an error; the release is left to helm.
    pub(crate) async fn wait(&self, ctx: &MigrationContext, release_name: &str) -> Result<()> {
        for attempt in 1..=self.attempts {
            let release = ctx.helm.get_release(release_name).await?.ok_or_else(|| {
                Error::helm("status", format!("release {} not found", release_name))
            })?;

            if !release.status.is_pending() {
                debug!(release = release_name, status = ?release.status, "release settled");
                return Ok(());
            }

            debug!(release = release_name, attempt, status = ?release.status, "release pending");
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = ctx.cancel.cancelled() => {
                    return Err(Error::cancelled(format!("waiting for release {}", release_name)));
                }
            }
        }

        warn!(
            release = release_name,
            attempts = self.attempts,
            "release still pending, continuing"
        );
        Ok(())
    }
}
