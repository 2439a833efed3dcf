//! JSON file state store.

use async_trait::async_trait;
use deployit_core::state::{AppliedState, StateStore};
use deployit_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// Current on-disk schema version.
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    #[serde(default)]
    resources: AppliedState,
}

/// Stores applied state in a single JSON file.
///
/// Saves go to a sibling temp file that is then renamed over the target,
/// so a failed save leaves the previous state in place.
pub struct FileStateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn store_err(action: &str, path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Store(format!("failed to {} {}: {}", action, path.display(), e))
}

#[async_trait]
impl StateStore for FileStateStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn load(&self) -> Result<AppliedState> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "State file does not exist, starting empty");
                return Ok(AppliedState::new());
            }
            Err(e) => return Err(store_err("read", &self.path, e)),
        };

        let file: StateFile =
            serde_json::from_str(&content).map_err(|e| store_err("parse", &self.path, e))?;
        if file.version != STATE_VERSION {
            return Err(Error::Store(format!(
                "unsupported state version {} in {} (expected {})",
                file.version,
                self.path.display(),
                STATE_VERSION
            )));
        }

        debug!(path = %self.path.display(), resources = file.resources.len(), "Loaded state");
        Ok(file.resources)
    }

    async fn save(&self, state: &AppliedState) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| store_err("create directory", dir, e))?;
        }

        let file = StateFile {
            version: STATE_VERSION,
            resources: state.clone(),
        };
        let content =
            serde_json::to_vec_pretty(&file).map_err(|e| store_err("serialize", &self.path, e))?;

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &content)
            .await
            .map_err(|e| store_err("write", &tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| store_err("replace", &self.path, e))?;

        debug!(path = %self.path.display(), resources = state.len(), "Saved state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use deployit_core::state::AppliedRecord;
    use deployit_core::{ResourceKind, ResourceOutput};

    fn record(kind: ResourceKind, hash: &str) -> AppliedRecord {
        AppliedRecord {
            kind,
            input_hash: hash.to_string(),
            outputs: ResourceOutput::new().with("host", "postgres-postgresql"),
            artifact: None,
            last_applied_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let store = FileStateStore::new(&path);

        let mut state = AppliedState::new();
        state.insert("postgres", record(ResourceKind::Database, "abc123"));
        store.save(&state).await.unwrap();

        let loaded = FileStateStore::new(&path).load().await.unwrap();
        assert_eq!(loaded, state);
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));

        let mut state = AppliedState::new();
        state.insert("catfacts", record(ResourceKind::Namespace, "ff00"));
        store.save(&state).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        let entry = &raw["resources"]["catfacts"];
        assert_eq!(entry["kind"], "namespace");
        assert_eq!(entry["inputHash"], "ff00");
        assert_eq!(entry["outputs"]["host"], "postgres-postgresql");
        assert!(entry["lastAppliedAt"].is_string());
        assert!(entry.get("artifact").is_none());
    }

    #[tokio::test]
    async fn test_unknown_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"version": 99, "resources": {}}"#).unwrap();

        let result = FileStateStore::new(&path).load().await;
        assert!(matches!(result, Err(Error::Store(_))));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            FileStateStore::new(&path).load().await,
            Err(Error::Store(_))
        ));
    }
}
