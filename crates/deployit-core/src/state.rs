//! Persisted per-resource state and the state store abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::Result;
use crate::artifact::BuildArtifact;
use crate::output::ResourceOutput;
use crate::resource::ResourceKind;

/// What was last applied for one resource. Holds a hash of the resolved
/// inputs, never the inputs themselves, so no secret plaintext is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedRecord {
    pub kind: ResourceKind,
    pub input_hash: String,
    pub outputs: ResourceOutput,
    /// Registry reference of the image, for image builds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<BuildArtifact>,
    pub last_applied_at: DateTime<Utc>,
}

impl AppliedRecord {
    /// First 12 characters of the input hash, for display.
    pub fn short_hash(&self) -> &str {
        short_hash(&self.input_hash)
    }
}

/// Abbreviate a hex digest for logs and tables.
pub fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// Applied state of every resource, keyed by resource name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppliedState {
    records: BTreeMap<String, AppliedRecord>,
}

impl AppliedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&AppliedRecord> {
        self.records.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, record: AppliedRecord) {
        self.records.insert(name.into(), record);
    }

    pub fn remove(&mut self, name: &str) -> Option<AppliedRecord> {
        self.records.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AppliedRecord)> {
        self.records.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(|k| k.as_str())
    }

    /// Every persisted build artifact.
    pub fn artifacts(&self) -> impl Iterator<Item = &BuildArtifact> {
        self.records.values().filter_map(|r| r.artifact.as_ref())
    }
}

/// Trait for state persistence backends.
///
/// Callers serialize writes; implementations may assume a single writer
/// but must leave the previous state intact if a save fails.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Name of this backend.
    fn name(&self) -> &'static str;

    /// Load the last saved state. A store that was never written is empty.
    async fn load(&self) -> Result<AppliedState>;

    /// Replace the saved state.
    async fn save(&self, state: &AppliedState) -> Result<()>;
}
