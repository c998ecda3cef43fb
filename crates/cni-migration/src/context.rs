//! Shared collaborators handed to every step

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use cni_migration_common::Config;

use crate::cluster::ClusterClient;
use crate::helm::HelmClient;

/// Everything a step needs to inspect and change the cluster
///
/// Built once per invocation; cloning shares the underlying clients.
#[derive(Clone)]
pub struct MigrationContext {
    pub config: Arc<Config>,
    pub cluster: Arc<dyn ClusterClient>,
    pub helm: Arc<dyn HelmClient>,
    /// Fired on Ctrl-C; step-internal waits observe it
    pub cancel: CancellationToken,
}

impl MigrationContext {
    pub fn new(
        config: Config,
        cluster: Arc<dyn ClusterClient>,
        helm: Arc<dyn HelmClient>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config: Arc::new(config),
            cluster,
            helm,
            cancel,
        }
    }
}
