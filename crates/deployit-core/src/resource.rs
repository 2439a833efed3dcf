//! Resource declarations.
//!
//! A declaration is the static description of one resource for one apply run:
//! its identity, its inputs, and the resources it explicitly depends on.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use crate::Error;
use crate::value::Value;

/// Kind of a managed resource. Selects the provisioner that applies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Namespace,
    Database,
    ImageBuild,
    Chart,
    ScheduledJob,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Namespace,
        ResourceKind::Database,
        ResourceKind::ImageBuild,
        ResourceKind::Chart,
        ResourceKind::ScheduledJob,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Namespace => "namespace",
            ResourceKind::Database => "database",
            ResourceKind::ImageBuild => "image_build",
            ResourceKind::Chart => "chart",
            ResourceKind::ScheduledJob => "scheduled_job",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept both `image_build` and `image-build` spellings.
        let normalized = s.replace('-', "_");
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| Error::InvalidInput(format!("unknown resource kind: {}", s)))
    }
}

/// Declaration of a single resource.
///
/// Immutable once built; construct with [`ResourceDeclaration::new`] and the
/// builder methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDeclaration {
    name: String,
    kind: ResourceKind,
    inputs: BTreeMap<String, Value>,
    depends_on: BTreeSet<String>,
}

impl ResourceDeclaration {
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs: BTreeMap::new(),
            depends_on: BTreeSet::new(),
        }
    }

    /// Set an input parameter.
    pub fn input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    /// Add an explicit dependency.
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.insert(name.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn inputs(&self) -> &BTreeMap<String, Value> {
        &self.inputs
    }

    /// Explicitly declared dependencies.
    pub fn explicit_dependencies(&self) -> &BTreeSet<String> {
        &self.depends_on
    }

    /// Resources whose outputs are referenced anywhere in the inputs.
    pub fn referenced_resources(&self) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        for value in self.inputs.values() {
            value.collect_output_refs(&mut found);
        }
        found
    }

    /// Explicit dependencies plus implicit ones from output references.
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut deps = self.depends_on.clone();
        deps.extend(self.referenced_resources());
        deps
    }

    /// Names of all secrets referenced by the inputs.
    pub fn secret_names(&self) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        for value in self.inputs.values() {
            value.collect_secret_refs(&mut found);
        }
        found
    }
}
