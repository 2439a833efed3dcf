//! Helm release installation.

use async_trait::async_trait;
use deployit_core::{Error, Result};
use serde::Deserialize;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One release to install or upgrade.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseSpec {
    pub release: String,
    pub namespace: String,
    /// Chart name in `repo`, or a local chart directory.
    pub chart: String,
    pub repo: Option<String>,
    pub version: Option<String>,
    /// Chart values; may contain secret plaintext, so never logged.
    pub values: serde_json::Value,
}

/// Result of an install or upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseStatus {
    pub revision: u64,
    pub status: String,
}

/// Installs or upgrades chart releases.
#[async_trait]
pub trait ReleaseInstaller: Send + Sync {
    fn name(&self) -> &'static str;

    /// Install `spec`, or upgrade it if the release already exists.
    async fn upgrade_install(
        &self,
        spec: &ReleaseSpec,
        cancel: &CancellationToken,
    ) -> Result<ReleaseStatus>;
}

/// Helm's own default of five minutes is too short for a first database
/// install that has to provision a volume.
pub const DEFAULT_TIMEOUT: &str = "1h";

/// Runs the `helm` executable.
pub struct HelmCli {
    helm_bin: String,
    kube_context: Option<String>,
    timeout: String,
}

#[derive(Deserialize)]
struct HelmRelease {
    version: u64,
    info: HelmReleaseInfo,
}

#[derive(Deserialize)]
struct HelmReleaseInfo {
    status: String,
}

impl HelmCli {
    pub fn new(helm_bin: impl Into<String>) -> Self {
        Self {
            helm_bin: helm_bin.into(),
            kube_context: None,
            timeout: DEFAULT_TIMEOUT.to_string(),
        }
    }

    /// How long `--wait` may block before helm gives up, as a Go duration.
    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = timeout.into();
        self
    }

    pub fn with_kube_context(mut self, context: Option<String>) -> Self {
        self.kube_context = context;
        self
    }

    /// Arguments for `helm upgrade --install`. Values are read from stdin so
    /// secrets never appear on the command line.
    pub fn upgrade_args(&self, spec: &ReleaseSpec) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "upgrade".into(),
            "--install".into(),
            spec.release.clone(),
            spec.chart.clone(),
            "--namespace".into(),
            spec.namespace.clone(),
            "--values".into(),
            "-".into(),
            "--output".into(),
            "json".into(),
            "--wait".into(),
            "--timeout".into(),
            self.timeout.clone(),
        ];
        if let Some(repo) = &spec.repo {
            args.push("--repo".into());
            args.push(repo.clone());
        }
        if let Some(version) = &spec.version {
            args.push("--version".into());
            args.push(version.clone());
        }
        if let Some(context) = &self.kube_context {
            args.push("--kube-context".into());
            args.push(context.clone());
        }
        args
    }
}

fn parse_release(stdout: &[u8]) -> Result<ReleaseStatus> {
    let release: HelmRelease = serde_json::from_slice(stdout)
        .map_err(|e| Error::Internal(format!("unexpected helm output: {}", e)))?;
    Ok(ReleaseStatus {
        revision: release.version,
        status: release.info.status,
    })
}

#[async_trait]
impl ReleaseInstaller for HelmCli {
    fn name(&self) -> &'static str {
        "helm"
    }

    async fn upgrade_install(
        &self,
        spec: &ReleaseSpec,
        cancel: &CancellationToken,
    ) -> Result<ReleaseStatus> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let args = self.upgrade_args(spec);
        info!(release = %spec.release, namespace = %spec.namespace, chart = %spec.chart, "Running helm upgrade --install");
        debug!(args = ?args, "Helm arguments");

        let values = serde_json::to_vec(&spec.values)
            .map_err(|e| Error::Internal(format!("failed to encode values: {}", e)))?;

        let mut command = Command::new(&self.helm_bin);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so a terminal ctrl-c reaches only deployit and
        // the release still finishes.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| Error::apply(&spec.release, format!("failed to run {}: {}", self.helm_bin, e)))?;

        // JSON is valid YAML, so helm reads the values as-is.
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&values)
                .await
                .map_err(|e| Error::apply(&spec.release, e))?;
        }

        // Once started, the release mutation runs to completion.
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::apply(&spec.release, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::apply(&spec.release, stderr.trim()));
        }

        let status = parse_release(&output.stdout)?;
        info!(release = %spec.release, revision = status.revision, status = %status.status, "Release installed");
        Ok(status)
    }
}
