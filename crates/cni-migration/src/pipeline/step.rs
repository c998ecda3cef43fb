//! The contract every migration step implements

use async_trait::async_trait;

use cni_migration_common::Result;

/// A unit of migration work
///
/// Steps hold no migration state of their own: everything they decide is
/// recomputed from the live cluster, which is what makes re-running the tool
/// after an interruption safe.
#[async_trait]
pub trait Step: Send + Sync {
    /// Report whether this step's end state already holds.
    ///
    /// Never mutates. `Ok(false)` means "not converged yet"; an error means
    /// the state could not be determined at all.
    async fn ready(&self) -> Result<bool>;

    /// Converge the cluster toward this step's end state.
    ///
    /// Idempotent. With `dry_run` set every read and log happens as in a live
    /// run but the final write is skipped. Does not re-verify readiness.
    async fn run(&self, dry_run: bool) -> Result<()>;
}
