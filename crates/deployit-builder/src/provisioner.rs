//! `image_build` resources.
//!
//! Inputs:
//! - `context` (required) - build context directory
//! - `dockerfile` - defaults to `<context>/Dockerfile`
//! - `repository` - defaults to `<registry>/<resource name>`
//! - `cache-from` - build stages to reuse layers from
//! - `build-args` - map of build arguments
//!
//! Outputs: `image`, `repository`, `tag`, `contentHash`.

use async_trait::async_trait;
use deployit_core::artifact::BuildRequest;
use deployit_core::provisioner::{Applied, ApplyContext, Provisioner};
use deployit_core::{Error, ResolvedInputs, ResourceKind, ResourceOutput, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::builder::ImageBuilder;
use crate::context::hash_context;

/// Input key the content hash is stored under before hashing the inputs.
pub const CONTENT_HASH: &str = "contentHash";

pub struct ImageBuildProvisioner {
    builder: Arc<ImageBuilder>,
    /// Relative paths are resolved against this directory.
    base_dir: PathBuf,
    registry: Option<String>,
}

impl ImageBuildProvisioner {
    pub fn new(builder: Arc<ImageBuilder>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            builder,
            base_dir: base_dir.into(),
            registry: None,
        }
    }

    /// Registry used for resources that don't name a repository.
    pub fn with_registry(mut self, registry: Option<String>) -> Self {
        self.registry = registry;
        self
    }

    fn request(&self, name: &str, inputs: &ResolvedInputs) -> Result<BuildRequest> {
        let context = self.base_dir.join(inputs.str("context")?);
        let dockerfile = match inputs.opt_str("dockerfile")? {
            Some(path) => self.base_dir.join(path),
            None => context.join("Dockerfile"),
        };
        let repository = match (inputs.opt_str("repository")?, &self.registry) {
            (Some(repo), _) => repo.to_string(),
            (None, Some(registry)) => format!("{}/{}", registry.trim_end_matches('/'), name),
            (None, None) => {
                return Err(Error::InvalidInput(format!(
                    "image build '{}' needs a repository or a registry setting",
                    name
                )));
            }
        };

        Ok(BuildRequest {
            context,
            dockerfile,
            repository,
            cache_from: inputs.string_list("cache-from")?,
            build_args: inputs.string_map("build-args")?,
        })
    }
}

#[async_trait]
impl Provisioner for ImageBuildProvisioner {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ImageBuild
    }

    /// Fold the build context's content hash into the inputs, so a source
    /// change alone makes the resource stale.
    async fn resolve_inputs(&self, name: &str, mut inputs: ResolvedInputs) -> Result<ResolvedInputs> {
        let request = self.request(name, &inputs)?;
        let hash = tokio::task::spawn_blocking(move || hash_context(&request))
            .await
            .map_err(|e| Error::Internal(e.to_string()))??;
        debug!(resource = %name, hash = %hash, "Computed build context hash");
        inputs.insert(CONTENT_HASH, serde_json::Value::String(hash));
        Ok(inputs)
    }

    async fn apply(
        &self,
        ctx: &ApplyContext<'_>,
        name: &str,
        inputs: &ResolvedInputs,
    ) -> Result<Applied> {
        let request = self.request(name, inputs)?;
        let content_hash = inputs.str(CONTENT_HASH)?;

        self.builder.remember(ctx.prior.artifacts()).await;
        let artifact = self
            .builder
            .build_with_hash(&request, content_hash, ctx.cancel)
            .await?;

        let outputs = ResourceOutput::new()
            .with("image", artifact.image.to_string())
            .with("repository", artifact.image.repository.clone())
            .with("tag", artifact.image.tag.clone())
            .with(CONTENT_HASH, artifact.content_hash.clone());

        Ok(Applied {
            outputs,
            artifact: Some(artifact),
        })
    }
}
