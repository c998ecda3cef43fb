//! Migrate a running cluster from AWS VPC CNI to Cilium
//!
//! The migration is split into two phases of five steps each. Every step can
//! tell whether its end state already holds, so the tool can be stopped and
//! re-run at any point: selected steps run only once their predecessor is
//! ready, and steps skipped over must already be ready themselves.

pub mod cluster;
pub mod context;
pub mod error;
pub mod helm;
pub mod pipeline;
pub mod steps;

pub use error::{Error, Result};

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use tracing_subscriber::EnvFilter;

use cni_migration_common::kube_utils::create_client;
use cni_migration_common::Config;

use crate::cluster::KubeClusterClient;
use crate::context::MigrationContext;
use crate::helm::HelmCli;
use crate::pipeline::{dispatch, Outcome, PhaseFlags, StepFlags};

const LONG_ABOUT: &str = "\
Migrate a running Kubernetes cluster from AWS VPC CNI to Cilium.

Steps are grouped into two phases that are never mixed in one run:

  pre-migration   0 preflight, 1 disable, 2 prepare, 3 priority, 4 deploy
  post-migration  5 delete, 6 remove, 7 update, 8 finalize, 9 enable

Each selected step runs only after the step before it reports ready. Steps
skipped over on the way to the highest selected step must already be ready.
Without --no-dry-run nothing in the cluster is changed.";

const EXAMPLES: &str = "\
Examples:
  # Show what the whole pre-migration phase would do
  cni-migration --pre-migration

  # Label nodes and pin aws-node, checking that steps 0 and 1 are done
  cni-migration --no-dry-run -2 -3

  # Run the whole post-migration phase against a specific cluster
  cni-migration --no-dry-run --post-migration --context prod-eu-west-1";

/// Migrate a cluster from AWS VPC CNI to Cilium
#[derive(Parser, Debug)]
#[command(name = "cni-migration")]
#[command(version, about, long_about = LONG_ABOUT, after_long_help = EXAMPLES)]
pub struct Cli {
    /// Apply changes; without it every step only reads and logs
    #[arg(long)]
    pub no_dry_run: bool,

    /// Run every pre-migration step (0-4)
    #[arg(long)]
    pub pre_migration: bool,

    /// Run every post-migration step (5-9)
    #[arg(long)]
    pub post_migration: bool,

    /// Install knet-stress and check cluster health
    #[arg(short = '0', long)]
    pub step_preflight: bool,

    /// Scale the cluster autoscaler to 0
    #[arg(short = '1', long)]
    pub step_disable: bool,

    /// Label every node as an AWS VPC CNI node
    #[arg(short = '2', long)]
    pub step_prepare: bool,

    /// Pin aws-node to AWS VPC CNI nodes
    #[arg(short = '3', long)]
    pub step_priority: bool,

    /// Install Cilium with the pre-migration values
    #[arg(short = '4', long)]
    pub step_deploy: bool,

    /// Delete the aws-node daemonset
    #[arg(short = '5', long)]
    pub step_delete: bool,

    /// Remove leftover AWS VPC CNI components
    #[arg(short = '6', long)]
    pub step_remove: bool,

    /// Upgrade Cilium with the post-migration values
    #[arg(short = '7', long)]
    pub step_update: bool,

    /// Remove the Cilium role label from every node
    #[arg(short = '8', long)]
    pub step_finalize: bool,

    /// Scale the cluster autoscaler back up
    #[arg(short = '9', long)]
    pub step_enable: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short = 'v', long, default_value = "debug")]
    pub log_level: String,

    /// Migration config file
    #[arg(short = 'c', long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Kubeconfig file; inferred when omitted
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long)]
    pub context: Option<String>,
}

impl Cli {
    /// Per-phase flags in step order
    pub fn step_flags(&self) -> StepFlags {
        StepFlags {
            pre_migration: PhaseFlags {
                run_all: self.pre_migration,
                steps: [
                    self.step_preflight,
                    self.step_disable,
                    self.step_prepare,
                    self.step_priority,
                    self.step_deploy,
                ],
            },
            post_migration: PhaseFlags {
                run_all: self.post_migration,
                steps: [
                    self.step_delete,
                    self.step_remove,
                    self.step_update,
                    self.step_finalize,
                    self.step_enable,
                ],
            },
        }
    }

    pub fn dry_run(&self) -> bool {
        !self.no_dry_run
    }

    /// Validate the selection, connect, and run the selected phase
    ///
    /// Phase exclusivity is checked before the config is read or the cluster
    /// is contacted. An empty selection returns without doing either.
    pub async fn run(self, cancel: CancellationToken) -> Result<Outcome> {
        let flags = self.step_flags();
        if flags.resolve()?.is_none() {
            info!("no steps selected");
            return Ok(Outcome::NoOp);
        }

        let config = Config::load(&self.config)?;
        debug!(path = %self.config.display(), "loaded config");

        let client = create_client(self.kubeconfig.as_deref(), self.context.as_deref()).await?;
        let cluster = Arc::new(KubeClusterClient::new(client, cancel.clone()));
        let helm = Arc::new(HelmCli::new(
            config.cilium.namespace.clone(),
            self.kubeconfig.clone(),
            self.context.clone(),
            cancel.clone(),
        ));

        let ctx = MigrationContext::new(config, cluster, helm, cancel);
        let pipeline = steps::build_pipeline(&ctx)?;

        let dry_run = self.dry_run();
        dispatch(&pipeline, &flags, dry_run)
            .instrument(info_span!("migration", dry_run))
            .await
    }
}

/// Log filter from `RUST_LOG`, falling back to `level`
pub fn log_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let parsed: tracing::Level = level.parse().map_err(|e| Error::LogLevel {
        level: level.to_string(),
        message: format!("{}", e),
    })?;
    Ok(EnvFilter::new(parsed.as_str()))
}
