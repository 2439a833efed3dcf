//! `database` resources: PostgreSQL installed from the Bitnami chart.
//!
//! Accepts the same inputs as `chart`, with `chart` defaulting to
//! `postgresql` from the Bitnami repository. Outputs the release fields plus
//! `host` (`<release>-postgresql`, the chart's service name) and `port`.

use async_trait::async_trait;
use deployit_core::provisioner::{Applied, ApplyContext, Provisioner};
use deployit_core::{ResolvedInputs, ResourceKind, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::chart::{ChartDefaults, release_outputs, release_spec};
use crate::helm::ReleaseInstaller;

pub const DEFAULT_CHART: &str = "postgresql";
pub const DEFAULT_REPO: &str = "https://charts.bitnami.com/bitnami";
pub const POSTGRES_PORT: u16 = 5432;

pub struct DatabaseProvisioner {
    installer: Arc<dyn ReleaseInstaller>,
    base_dir: PathBuf,
}

impl DatabaseProvisioner {
    pub fn new(installer: Arc<dyn ReleaseInstaller>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            installer,
            base_dir: base_dir.into(),
        }
    }
}

#[async_trait]
impl Provisioner for DatabaseProvisioner {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Database
    }

    async fn apply(
        &self,
        ctx: &ApplyContext<'_>,
        name: &str,
        inputs: &ResolvedInputs,
    ) -> Result<Applied> {
        let defaults = ChartDefaults {
            chart: Some(DEFAULT_CHART),
            repo: Some(DEFAULT_REPO),
        };
        let spec = release_spec(name, inputs, &self.base_dir, &defaults)?;
        let status = self.installer.upgrade_install(&spec, ctx.cancel).await?;

        let mut outputs = release_outputs(&spec, &status);
        outputs.insert("host", format!("{}-postgresql", spec.release));
        outputs.insert("port", POSTGRES_PORT.to_string());
        Ok(outputs.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::tests::{RecordingInstaller, apply_with, inputs};

    #[tokio::test]
    async fn test_defaults_to_bitnami_postgresql() {
        let installer = Arc::new(RecordingInstaller::default());
        let provisioner = DatabaseProvisioner::new(installer.clone(), ".");

        let resolved = inputs(serde_json::json!({
            "namespace": "catfacts",
            "version": "10.3.11",
            "values": {
                "global": {"storageClass": "gp2"},
                "image": {"tag": "9.6.12"},
                "postgresqlPassword": "hunter2",
                "rbac": {"create": true}
            }
        }));
        let applied = apply_with(&provisioner, "postgres", &resolved).await.unwrap();

        assert_eq!(applied.outputs.get("host"), Some("postgres-postgresql"));
        assert_eq!(applied.outputs.get("port"), Some("5432"));

        let spec = installer.installed.lock().unwrap()[0].clone();
        assert_eq!(spec.chart, "postgresql");
        assert_eq!(spec.repo.as_deref(), Some(DEFAULT_REPO));
        assert_eq!(spec.version.as_deref(), Some("10.3.11"));
        assert_eq!(spec.values["global"]["storageClass"], "gp2");
    }

    #[tokio::test]
    async fn test_outputs_hold_no_secrets() {
        let provisioner = DatabaseProvisioner::new(Arc::new(RecordingInstaller::default()), ".");
        let resolved = inputs(serde_json::json!({
            "namespace": "catfacts",
            "release": "db",
            "values": {"postgresqlPassword": "hunter2"}
        }));
        let applied = apply_with(&provisioner, "postgres", &resolved).await.unwrap();

        assert_eq!(applied.outputs.get("host"), Some("db-postgresql"));
        assert!(applied.outputs.iter().all(|(_, v)| v != "hunter2"));
    }
}
