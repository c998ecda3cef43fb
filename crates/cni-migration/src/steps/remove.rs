//! Step 6: reserved for cleaning up leftover AWS VPC CNI components

use async_trait::async_trait;
use tracing::info;

use cni_migration_common::Result;

use crate::pipeline::Step;

/// Placeholder between deleting aws-node and upgrading Cilium
///
/// Always ready; running it only logs. It keeps its ordinal so the CLI flags
/// of later steps stay stable.
#[derive(Debug, Default)]
pub struct Remove;

impl Remove {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Step for Remove {
    async fn ready(&self) -> Result<bool> {
        info!("remove ready");
        Ok(true)
    }

    async fn run(&self, dry_run: bool) -> Result<()> {
        info!(dry_run, "no aws-node components left to remove");
        Ok(())
    }
}
