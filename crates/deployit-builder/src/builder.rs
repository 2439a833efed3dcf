//! Build-once, push-once image builder.

use chrono::Utc;
use deployit_core::artifact::{BuildArtifact, BuildRequest, ImageBackend, ImageReference};
use deployit_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::hash_context;

/// Produces content-addressed images.
///
/// Images are tagged `<repository>:<content hash>`. A given reference is
/// built and pushed at most once per builder; artifacts recorded by earlier
/// runs are reused without touching the backend.
pub struct ImageBuilder {
    backend: Arc<dyn ImageBackend>,
    artifacts: Mutex<HashMap<String, Arc<OnceCell<BuildArtifact>>>>,
}

impl ImageBuilder {
    pub fn new(backend: Arc<dyn ImageBackend>) -> Self {
        Self {
            backend,
            artifacts: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Record artifacts known to exist in the registry already.
    pub async fn remember<'a>(&self, artifacts: impl IntoIterator<Item = &'a BuildArtifact>) {
        let mut known = self.artifacts.lock().await;
        for artifact in artifacts {
            known
                .entry(artifact.image.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new_with(Some(artifact.clone()))));
        }
    }

    /// Hash the build context, then build and push unless already done.
    pub async fn build_and_push(
        &self,
        request: &BuildRequest,
        cancel: &CancellationToken,
    ) -> Result<BuildArtifact> {
        let hash_request = request.clone();
        let content_hash = tokio::task::spawn_blocking(move || hash_context(&hash_request))
            .await
            .map_err(|e| Error::Internal(e.to_string()))??;
        self.build_with_hash(request, &content_hash, cancel).await
    }

    /// Build and push `request` as `<repository>:<content_hash>` unless an
    /// artifact for that reference is already known.
    pub async fn build_with_hash(
        &self,
        request: &BuildRequest,
        content_hash: &str,
        cancel: &CancellationToken,
    ) -> Result<BuildArtifact> {
        let image = ImageReference::new(&request.repository, content_hash);
        let key = image.to_string();

        let cell = {
            let mut known = self.artifacts.lock().await;
            known
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        if let Some(artifact) = cell.get() {
            debug!(image = %key, "Image already published, reusing artifact");
            return Ok(artifact.clone());
        }

        // Concurrent requests for the same reference wait on one build.
        let artifact = cell
            .get_or_try_init(|| async {
                self.backend.build(request, &image, cancel).await?;
                self.backend.push(&image, cancel).await?;
                info!(image = %image, backend = %self.backend.name(), "Published image");
                Ok::<_, Error>(BuildArtifact {
                    content_hash: content_hash.to_string(),
                    image: image.clone(),
                    built_at: Utc::now(),
                })
            })
            .await?;

        Ok(artifact.clone())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::Mutex as StdMutex;

    /// Records builds and pushes instead of talking to a daemon.
    #[derive(Default)]
    pub(crate) struct RecordingBackend {
        pub builds: StdMutex<Vec<String>>,
        pub pushes: StdMutex<Vec<String>>,
        pub fail_push: bool,
    }

    #[async_trait]
    impl ImageBackend for RecordingBackend {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn build(
            &self,
            _request: &BuildRequest,
            image: &ImageReference,
            _cancel: &CancellationToken,
        ) -> Result<()> {
            self.builds.lock().unwrap().push(image.to_string());
            Ok(())
        }

        async fn push(&self, image: &ImageReference, _cancel: &CancellationToken) -> Result<()> {
            if self.fail_push {
                return Err(Error::Build(format!("push {}: denied", image)));
            }
            self.pushes.lock().unwrap().push(image.to_string());
            Ok(())
        }
    }

    pub(crate) fn context_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM golang AS build\n").unwrap();
        std::fs::write(dir.path().join("main.go"), "package main\n").unwrap();
        dir
    }

    fn request(root: &Path) -> BuildRequest {
        BuildRequest {
            context: root.to_path_buf(),
            dockerfile: root.join("Dockerfile"),
            repository: "registry.example/catfacts/api".to_string(),
            cache_from: vec!["build".to_string()],
            build_args: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_identical_builds_push_once() {
        let dir = context_dir();
        let backend = Arc::new(RecordingBackend::default());
        let builder = ImageBuilder::new(backend.clone());
        let cancel = CancellationToken::new();

        let first = builder.build_and_push(&request(dir.path()), &cancel).await.unwrap();
        let second = builder.build_and_push(&request(dir.path()), &cancel).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.image.tag, first.content_hash);
        assert_eq!(backend.pushes.lock().unwrap().len(), 1);
        assert_eq!(backend.builds.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_identical_builds_push_once() {
        let dir = context_dir();
        let backend = Arc::new(RecordingBackend::default());
        let builder = ImageBuilder::new(backend.clone());
        let cancel = CancellationToken::new();
        let req = request(dir.path());

        let (a, b) = tokio::join!(
            builder.build_and_push(&req, &cancel),
            builder.build_and_push(&req, &cancel)
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(backend.pushes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remembered_artifact_skips_backend() {
        let dir = context_dir();
        let backend = Arc::new(RecordingBackend::default());
        let cancel = CancellationToken::new();

        let earlier = ImageBuilder::new(backend.clone())
            .build_and_push(&request(dir.path()), &cancel)
            .await
            .unwrap();

        let builder = ImageBuilder::new(backend.clone());
        builder.remember([&earlier]).await;
        let again = builder
            .build_and_push(&request(dir.path()), &cancel)
            .await
            .unwrap();

        assert_eq!(again, earlier);
        assert_eq!(backend.pushes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_push_failure_is_build_error_and_not_cached() {
        let dir = context_dir();
        let backend = Arc::new(RecordingBackend {
            fail_push: true,
            ..Default::default()
        });
        let builder = ImageBuilder::new(backend.clone());
        let cancel = CancellationToken::new();

        let result = builder.build_and_push(&request(dir.path()), &cancel).await;
        assert!(matches!(result, Err(Error::Build(_))));

        // A retry goes back to the backend.
        let _ = builder.build_and_push(&request(dir.path()), &cancel).await;
        assert_eq!(backend.builds.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_other_repository_is_a_separate_image() {
        let dir = context_dir();
        let backend = Arc::new(RecordingBackend::default());
        let builder = ImageBuilder::new(backend.clone());
        let cancel = CancellationToken::new();

        let mut other = request(dir.path());
        other.repository = "registry.example/catfacts/frontend".to_string();

        builder.build_and_push(&request(dir.path()), &cancel).await.unwrap();
        builder.build_and_push(&other, &cancel).await.unwrap();
        assert_eq!(backend.pushes.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_does_not_interrupt_started_publish() {
        let dir = context_dir();
        let backend = Arc::new(RecordingBackend::default());
        let builder = ImageBuilder::new(backend.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let artifact = builder
            .build_and_push(&request(dir.path()), &cancel)
            .await
            .unwrap();

        assert_eq!(*backend.builds.lock().unwrap(), vec![artifact.image.to_string()]);
        assert_eq!(*backend.pushes.lock().unwrap(), vec![artifact.image.to_string()]);
    }
}
