//! Container image build artifacts and the build backend abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// A content-addressed image reference, `registry/repo:tag`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    /// Registry host plus repository path.
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Parse `registry/repo:tag`. A colon inside the registry host (port)
    /// is not mistaken for the tag separator.
    pub fn parse(s: &str) -> Result<Self> {
        let last_segment_start = s.rfind('/').map(|i| i + 1).unwrap_or(0);
        match s[last_segment_start..].rfind(':') {
            Some(i) => {
                let split = last_segment_start + i;
                let (repository, tag) = (&s[..split], &s[split + 1..]);
                if repository.is_empty() || tag.is_empty() {
                    return Err(Error::InvalidInput(format!("invalid image reference: {}", s)));
                }
                Ok(Self::new(repository, tag))
            }
            None => Err(Error::InvalidInput(format!(
                "image reference has no tag: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Result of building and pushing an image. The content hash doubles as
/// the cache key and as the image tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildArtifact {
    pub content_hash: String,
    pub image: ImageReference,
    pub built_at: DateTime<Utc>,
}

/// Everything needed to build one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Build context directory.
    pub context: PathBuf,
    /// Dockerfile path, relative to the working directory (not the context).
    pub dockerfile: PathBuf,
    /// Target repository including the registry host.
    pub repository: String,
    /// Build stages to reuse layers from.
    pub cache_from: Vec<String>,
    /// Build arguments; part of the content hash.
    pub build_args: BTreeMap<String, String>,
}

/// Backend that actually builds and pushes images (docker daemon, buildkit, ...).
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Name of this backend.
    fn name(&self) -> &'static str;

    /// Build `request` and tag the result as `image`.
    async fn build(
        &self,
        request: &BuildRequest,
        image: &ImageReference,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Push a previously built image to its registry.
    async fn push(&self, image: &ImageReference, cancel: &CancellationToken) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_image_reference() {
        let image = ImageReference::parse("123.dkr.ecr.us-west-2.amazonaws.com/api:abc123").unwrap();
        assert_eq!(image.repository, "123.dkr.ecr.us-west-2.amazonaws.com/api");
        assert_eq!(image.tag, "abc123");
        assert_eq!(
            image.to_string(),
            "123.dkr.ecr.us-west-2.amazonaws.com/api:abc123"
        );
    }

    #[test]
    fn test_parse_registry_with_port() {
        let image = ImageReference::parse("localhost:5000/catfacts/api:deadbeef").unwrap();
        assert_eq!(image.repository, "localhost:5000/catfacts/api");
        assert_eq!(image.tag, "deadbeef");

        assert!(ImageReference::parse("localhost:5000/catfacts/api").is_err());
        assert!(ImageReference::parse("api:").is_err());
    }
}
