//! `chart` resources: an application chart installed as a Helm release.
//!
//! Inputs:
//! - `namespace` (required)
//! - `chart` + `repo` for a published chart, or `path` for a local one
//! - `version`, `release` (defaults to the resource name)
//! - `values` - nested map handed to the chart
//!
//! Outputs: `release`, `namespace`, `revision`, `status`.

use async_trait::async_trait;
use deployit_builder::hash_directory;
use deployit_core::provisioner::{Applied, ApplyContext, Provisioner};
use deployit_core::{Error, ResolvedInputs, ResourceKind, ResourceOutput, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::helm::{ReleaseInstaller, ReleaseSpec, ReleaseStatus};

/// Input holding the content hash of a local chart directory.
pub const CHART_HASH: &str = "chartHash";

/// Chart source and version defaults for a kind of release.
#[derive(Debug, Clone, Default)]
pub(crate) struct ChartDefaults {
    pub chart: Option<&'static str>,
    pub repo: Option<&'static str>,
}

/// Build a release spec from resolved inputs.
pub(crate) fn release_spec(
    name: &str,
    inputs: &ResolvedInputs,
    base_dir: &std::path::Path,
    defaults: &ChartDefaults,
) -> Result<ReleaseSpec> {
    let (chart, repo) = match (inputs.opt_str("path")?, inputs.opt_str("chart")?) {
        (Some(_), Some(_)) => {
            return Err(Error::InvalidInput(format!(
                "'{}' sets both 'path' and 'chart'",
                name
            )));
        }
        (Some(path), None) => (base_dir.join(path).to_string_lossy().into_owned(), None),
        (None, Some(chart)) => (
            chart.to_string(),
            inputs
                .opt_str("repo")?
                .or(defaults.repo)
                .map(str::to_string),
        ),
        (None, None) => match defaults.chart {
            Some(chart) => (
                chart.to_string(),
                inputs
                    .opt_str("repo")?
                    .or(defaults.repo)
                    .map(str::to_string),
            ),
            None => {
                return Err(Error::InvalidInput(format!(
                    "'{}' needs a 'chart' or a 'path' input",
                    name
                )));
            }
        },
    };

    Ok(ReleaseSpec {
        release: inputs.opt_str("release")?.unwrap_or(name).to_string(),
        namespace: inputs.str("namespace")?.to_string(),
        chart,
        repo,
        version: inputs.opt_str("version")?.map(str::to_string),
        values: serde_json::Value::Object(inputs.object("values")?),
    })
}

pub(crate) fn release_outputs(spec: &ReleaseSpec, status: &ReleaseStatus) -> ResourceOutput {
    ResourceOutput::new()
        .with("release", spec.release.clone())
        .with("namespace", spec.namespace.clone())
        .with("revision", status.revision.to_string())
        .with("status", status.status.clone())
}

/// Installs application charts.
pub struct ChartProvisioner {
    installer: Arc<dyn ReleaseInstaller>,
    base_dir: PathBuf,
}

impl ChartProvisioner {
    pub fn new(installer: Arc<dyn ReleaseInstaller>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            installer,
            base_dir: base_dir.into(),
        }
    }
}

#[async_trait]
impl Provisioner for ChartProvisioner {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Chart
    }

    /// Local charts contribute a hash of their files, so template edits
    /// re-install the release.
    async fn resolve_inputs(&self, name: &str, mut inputs: ResolvedInputs) -> Result<ResolvedInputs> {
        let Some(path) = inputs.opt_str("path")? else {
            return Ok(inputs);
        };
        let dir = self.base_dir.join(path);
        let hash = tokio::task::spawn_blocking(move || hash_directory(&dir))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
            .map_err(|e| Error::InvalidInput(format!("chart '{}': {}", name, e)))?;
        debug!(resource = %name, hash = %hash, "Hashed local chart");
        inputs.insert(CHART_HASH, serde_json::Value::String(hash));
        Ok(inputs)
    }

    async fn apply(
        &self,
        ctx: &ApplyContext<'_>,
        name: &str,
        inputs: &ResolvedInputs,
    ) -> Result<Applied> {
        let spec = release_spec(name, inputs, &self.base_dir, &ChartDefaults::default())?;
        let status = self.installer.upgrade_install(&spec, ctx.cancel).await?;
        Ok(release_outputs(&spec, &status).into())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use deployit_core::DeployContext;
    use deployit_core::state::AppliedState;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    /// Remembers every release it was asked to install.
    #[derive(Default)]
    pub(crate) struct RecordingInstaller {
        pub installed: Mutex<Vec<ReleaseSpec>>,
    }

    #[async_trait]
    impl ReleaseInstaller for RecordingInstaller {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn upgrade_install(
            &self,
            spec: &ReleaseSpec,
            _cancel: &CancellationToken,
        ) -> Result<ReleaseStatus> {
            let mut installed = self.installed.lock().unwrap();
            installed.push(spec.clone());
            Ok(ReleaseStatus {
                revision: installed.len() as u64,
                status: "deployed".to_string(),
            })
        }
    }

    pub(crate) fn inputs(value: serde_json::Value) -> ResolvedInputs {
        let serde_json::Value::Object(map) = value else {
            panic!("inputs must be an object");
        };
        ResolvedInputs::from_values(map.into_iter().collect::<BTreeMap<_, _>>())
    }

    pub(crate) async fn apply_with(
        provisioner: &dyn Provisioner,
        name: &str,
        inputs: &ResolvedInputs,
    ) -> Result<Applied> {
        let deploy = DeployContext::new("catfacts", "prod");
        let prior = AppliedState::new();
        let cancel = CancellationToken::new();
        let ctx = ApplyContext {
            deploy: &deploy,
            prior: &prior,
            cancel: &cancel,
        };
        provisioner.apply(&ctx, name, inputs).await
    }

    fn api_inputs() -> ResolvedInputs {
        inputs(serde_json::json!({
            "namespace": "catfacts",
            "path": "deployment/helm/api",
            "values": {
                "replicaCount": 2,
                "image": "registry.example/api:abc",
                "ingress": {
                    "match": "Host(`catfacts.aaronbatilo.dev`) && PathPrefix(`/api`)",
                    "entryPoints": ["websecure"]
                }
            }
        }))
    }

    #[tokio::test]
    async fn test_local_chart_release() {
        let installer = Arc::new(RecordingInstaller::default());
        let provisioner = ChartProvisioner::new(installer.clone(), "/srv/catfacts");

        let applied = apply_with(&provisioner, "api", &api_inputs()).await.unwrap();
        assert_eq!(applied.outputs.get("release"), Some("api"));
        assert_eq!(applied.outputs.get("namespace"), Some("catfacts"));
        assert_eq!(applied.outputs.get("revision"), Some("1"));

        let spec = installer.installed.lock().unwrap()[0].clone();
        assert_eq!(
            Path::new(&spec.chart),
            Path::new("/srv/catfacts/deployment/helm/api")
        );
        assert_eq!(spec.repo, None);
        assert_eq!(spec.values["ingress"]["entryPoints"][0], "websecure");
    }

    #[tokio::test]
    async fn test_chart_and_path_are_exclusive() {
        let provisioner = ChartProvisioner::new(Arc::new(RecordingInstaller::default()), ".");
        let both = inputs(serde_json::json!({
            "namespace": "catfacts",
            "path": "deployment/helm/api",
            "chart": "api",
        }));
        assert!(matches!(
            apply_with(&provisioner, "api", &both).await,
            Err(Error::InvalidInput(_))
        ));

        let neither = inputs(serde_json::json!({"namespace": "catfacts"}));
        assert!(matches!(
            apply_with(&provisioner, "api", &neither).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_local_chart_hash_tracks_templates() {
        let dir = tempfile::tempdir().unwrap();
        let chart = dir.path().join("deployment/helm/api");
        std::fs::create_dir_all(chart.join("templates")).unwrap();
        std::fs::write(chart.join("Chart.yaml"), "name: api\n").unwrap();

        let provisioner = ChartProvisioner::new(Arc::new(RecordingInstaller::default()), dir.path());
        let first = provisioner.resolve_inputs("api", api_inputs()).await.unwrap();
        assert!(first.contains(CHART_HASH));

        std::fs::write(chart.join("templates/deployment.yaml"), "kind: Deployment\n").unwrap();
        let second = provisioner.resolve_inputs("api", api_inputs()).await.unwrap();
        assert_ne!(
            first.digest(ResourceKind::Chart),
            second.digest(ResourceKind::Chart)
        );
    }

    #[tokio::test]
    async fn test_published_chart_has_no_content_hash() {
        let provisioner = ChartProvisioner::new(Arc::new(RecordingInstaller::default()), ".");
        let published = inputs(serde_json::json!({
            "namespace": "catfacts",
            "chart": "traefik",
            "repo": "https://traefik.github.io/charts",
        }));
        let resolved = provisioner.resolve_inputs("traefik", published).await.unwrap();
        assert!(!resolved.contains(CHART_HASH));
    }
}
