//! Cilium helm release management
//!
//! Drives the `helm` binary. Repository config and cache live under /tmp so
//! the tool never touches the operator's own helm setup.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use cni_migration_common::config::Cilium;
use cni_migration_common::{Error, Result};

/// Helm repository config file
pub const REPOSITORY_CONFIG: &str = "/tmp/.helmrepo";
/// Helm repository cache directory
pub const REPOSITORY_CACHE: &str = "/tmp/.helmcache";
/// Timeout handed to helm for install and upgrade
pub const RELEASE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Helm release status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
    Deployed,
    Uninstalled,
    Superseded,
    Failed,
    Uninstalling,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
    #[serde(other)]
    Unknown,
}

impl ReleaseStatus {
    /// Whether helm is still working on the release
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            Self::PendingInstall | Self::PendingUpgrade | Self::PendingRollback
        )
    }
}

/// An installed helm release
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Release {
    pub name: String,
    pub namespace: String,
    pub revision: u64,
    pub status: ReleaseStatus,
}

/// Parameters for installing or upgrading a chart
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChartSpec {
    pub release_name: String,
    /// Chart reference, `repo/chart`
    pub chart_name: String,
    pub namespace: String,
    pub version: String,
    pub values_file: PathBuf,
    pub timeout: Duration,
    /// Let helm render and validate without installing
    pub dry_run: bool,
}

impl ChartSpec {
    /// Spec for the configured Cilium release with the given values file
    pub fn cilium(cilium: &Cilium, values_file: &Path, dry_run: bool) -> Self {
        Self {
            release_name: cilium.release_name.clone(),
            chart_name: cilium.chart_name.clone(),
            namespace: cilium.namespace.clone(),
            version: cilium.version.clone(),
            values_file: values_file.to_path_buf(),
            timeout: RELEASE_TIMEOUT,
            dry_run,
        }
    }
}

/// Trait abstracting the helm operations the steps perform
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HelmClient: Send + Sync {
    /// Look up a release in the configured namespace, `None` if absent
    async fn get_release(&self, name: &str) -> Result<Option<Release>>;

    /// Add a chart repository, replacing it if already present
    async fn add_or_update_repo(&self, name: &str, url: &str) -> Result<()>;

    /// `helm upgrade --install`
    async fn install_or_upgrade(&self, spec: &ChartSpec) -> Result<()>;

    /// `helm upgrade`; the release must already exist
    async fn upgrade(&self, spec: &ChartSpec) -> Result<()>;
}

/// [`HelmClient`] backed by the `helm` binary
pub struct HelmCli {
    namespace: String,
    kubeconfig: Option<PathBuf>,
    kube_context: Option<String>,
    cancel: CancellationToken,
}

impl HelmCli {
    /// Releases are looked up in `namespace`
    pub fn new(
        namespace: impl Into<String>,
        kubeconfig: Option<PathBuf>,
        kube_context: Option<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            kubeconfig,
            kube_context,
            cancel,
        }
    }

    /// Flags passed to every helm invocation
    fn global_args(&self) -> Vec<String> {
        let mut args = vec![
            "--repository-config".to_string(),
            REPOSITORY_CONFIG.to_string(),
            "--repository-cache".to_string(),
            REPOSITORY_CACHE.to_string(),
        ];
        if let Some(kubeconfig) = &self.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(kubeconfig.display().to_string());
        }
        if let Some(context) = &self.kube_context {
            args.push("--kube-context".to_string());
            args.push(context.clone());
        }
        args
    }

    fn status_args(&self, name: &str) -> Vec<String> {
        let mut args = vec![
            "status".to_string(),
            name.to_string(),
            "--namespace".to_string(),
            self.namespace.clone(),
            "--output".to_string(),
            "json".to_string(),
        ];
        args.extend(self.global_args());
        args
    }

    fn repo_add_args(&self, name: &str, url: &str) -> Vec<String> {
        let mut args = vec![
            "repo".to_string(),
            "add".to_string(),
            name.to_string(),
            url.to_string(),
            "--force-update".to_string(),
        ];
        args.extend(self.global_args());
        args
    }

    fn upgrade_args(&self, spec: &ChartSpec, install: bool) -> Vec<String> {
        let mut args = vec!["upgrade".to_string()];
        if install {
            args.push("--install".to_string());
        }
        args.extend([
            spec.release_name.clone(),
            spec.chart_name.clone(),
            "--namespace".to_string(),
            spec.namespace.clone(),
            "--version".to_string(),
            spec.version.clone(),
            "--values".to_string(),
            spec.values_file.display().to_string(),
            "--timeout".to_string(),
            format!("{}s", spec.timeout.as_secs()),
        ]);
        if spec.dry_run {
            args.push("--dry-run".to_string());
        }
        args.extend(self.global_args());
        args
    }

    async fn helm(&self, operation: &str, args: &[String]) -> Result<Output> {
        debug!(operation, ?args, "running helm");

        let mut command = Command::new("helm");
        command.args(args).kill_on_drop(true);

        tokio::select! {
            output = command.output() => output.map_err(|e| Error::helm(operation, format!("failed to run helm: {}", e))),
            _ = self.cancel.cancelled() => Err(Error::cancelled(format!("helm {}", operation))),
        }
    }

    async fn helm_checked(&self, operation: &str, args: &[String]) -> Result<Output> {
        let output = self.helm(operation, args).await?;
        if !output.status.success() {
            return Err(Error::helm(operation, stderr_message(&output)));
        }
        Ok(output)
    }
}

fn stderr_message(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

#[derive(Deserialize)]
struct StatusJson {
    name: String,
    namespace: String,
    version: u64,
    info: StatusInfoJson,
}

#[derive(Deserialize)]
struct StatusInfoJson {
    status: ReleaseStatus,
}

/// Parse `helm status -o json` output
pub fn parse_status(json: &[u8]) -> Result<Release> {
    let status: StatusJson = serde_json::from_slice(json)
        .map_err(|e| Error::helm("status", format!("unexpected status output: {}", e)))?;

    Ok(Release {
        name: status.name,
        namespace: status.namespace,
        revision: status.version,
        status: status.info.status,
    })
}

/// Whether helm's stderr says the release does not exist
fn is_release_not_found(stderr: &str) -> bool {
    stderr.contains("release: not found")
}

#[async_trait]
impl HelmClient for HelmCli {
    async fn get_release(&self, name: &str) -> Result<Option<Release>> {
        let output = self.helm("status", &self.status_args(name)).await?;

        if !output.status.success() {
            let stderr = stderr_message(&output);
            if is_release_not_found(&stderr) {
                return Ok(None);
            }
            return Err(Error::helm("status", stderr));
        }

        parse_status(&output.stdout).map(Some)
    }

    async fn add_or_update_repo(&self, name: &str, url: &str) -> Result<()> {
        self.helm_checked("repo add", &self.repo_add_args(name, url))
            .await?;
        Ok(())
    }

    async fn install_or_upgrade(&self, spec: &ChartSpec) -> Result<()> {
        self.helm_checked("install", &self.upgrade_args(spec, true))
            .await?;
        Ok(())
    }

    async fn upgrade(&self, spec: &ChartSpec) -> Result<()> {
        self.helm_checked("upgrade", &self.upgrade_args(spec, false))
            .await?;
        Ok(())
    }
}

/// Repository name of a `repo/chart` reference
pub fn repo_name(chart_name: &str) -> &str {
    chart_name
        .split_once('/')
        .map(|(repo, _)| repo)
        .unwrap_or(chart_name)
}
