//! Docker daemon image backend.

use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::image::{BuildImageOptions, PushImageOptions};
use bytes::Bytes;
use deployit_core::artifact::{BuildRequest, ImageBackend, ImageReference};
use deployit_core::{Error, Result};
use futures::StreamExt;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::archive_context;

/// Builds with the local docker daemon and pushes to the image's registry.
pub struct DockerBackend {
    docker: Docker,
    credentials: Option<DockerCredentials>,
}

impl DockerBackend {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self {
            docker,
            credentials: None,
        })
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker) -> Self {
        Self {
            docker,
            credentials: None,
        }
    }

    /// Registry credentials used for pushes.
    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.credentials = Some(DockerCredentials {
            username: Some(username),
            password: Some(password),
            ..Default::default()
        });
        self
    }
}

#[async_trait]
impl ImageBackend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn build(
        &self,
        request: &BuildRequest,
        image: &ImageReference,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        // Once started, a build runs to completion like the push.
        let archive_request = request.clone();
        let (archive, dockerfile) =
            tokio::task::spawn_blocking(move || archive_context(&archive_request))
                .await
                .map_err(|e| Error::Internal(e.to_string()))??;

        let tag = image.to_string();
        info!(image = %tag, dockerfile = %dockerfile, size = archive.len(), "Building image");

        let options = BuildImageOptions {
            dockerfile,
            t: tag.clone(),
            cachefrom: request.cache_from.clone(),
            buildargs: request
                .build_args
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<HashMap<_, _>>(),
            rm: true,
            ..Default::default()
        };

        let mut stream = std::pin::pin!(self.docker.build_image(
            options,
            None,
            Some(Bytes::from(archive))
        ));

        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| Error::Build(format!("{}: {}", tag, e)))?;
            if let Some(error) = info.error {
                return Err(Error::Build(format!("{}: {}", tag, error)));
            }
            if let Some(line) = info.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    debug!(image = %tag, "{}", line);
                }
            }
        }

        info!(image = %tag, "Image built");
        Ok(())
    }

    async fn push(&self, image: &ImageReference, _cancel: &CancellationToken) -> Result<()> {
        // Not interrupted once started, so the registry never holds a
        // half-written tag.
        info!(image = %image, "Pushing image");

        let options = PushImageOptions {
            tag: image.tag.clone(),
        };
        let mut stream = std::pin::pin!(self.docker.push_image(
            &image.repository,
            Some(options),
            self.credentials.clone()
        ));

        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| Error::Build(format!("push {}: {}", image, e)))?;
            if let Some(error) = info.error {
                return Err(Error::Build(format!("push {}: {}", image, error)));
            }
            if let Some(status) = info.status {
                debug!(image = %image, status = %status, "Push progress");
            }
        }

        info!(image = %image, "Image pushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    #[ignore]
    async fn test_backend_connects() {
        let backend = DockerBackend::new().unwrap();
        assert_eq!(backend.name(), "docker");
        assert!(backend.docker.ping().await.is_ok());
    }

    #[tokio::test]
    #[ignore]
    async fn test_build_small_image() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM alpine:latest\n").unwrap();

        let backend = DockerBackend::new().unwrap();
        let request = BuildRequest {
            context: dir.path().to_path_buf(),
            dockerfile: dir.path().join("Dockerfile"),
            repository: "deployit-test/alpine".to_string(),
            cache_from: vec![],
            build_args: BTreeMap::new(),
        };
        let image = ImageReference::new("deployit-test/alpine", "test");

        backend
            .build(&request, &image, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_started_build_finishes_after_cancel() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM alpine:latest\n").unwrap();

        let backend = DockerBackend::new().unwrap();
        let request = BuildRequest {
            context: dir.path().to_path_buf(),
            dockerfile: dir.path().join("Dockerfile"),
            repository: "deployit-test/alpine".to_string(),
            cache_from: vec![],
            build_args: BTreeMap::new(),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        backend
            .build(&request, &ImageReference::new("deployit-test/alpine", "x"), &cancel)
            .await
            .unwrap();
    }
}
