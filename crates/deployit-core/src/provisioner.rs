//! Per-kind create-or-update operations.
//!
//! Each resource kind is applied by one [`Provisioner`]. The engine resolves
//! references, lets the provisioner enrich the inputs, hashes them, and only
//! calls [`Provisioner::apply`] when the hash or an upstream resource changed.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::artifact::BuildArtifact;
use crate::context::DeployContext;
use crate::output::ResourceOutput;
use crate::resource::ResourceKind;
use crate::state::AppliedState;
use crate::value::ResolvedInputs;

/// Context handed to a provisioner for one apply call.
pub struct ApplyContext<'a> {
    pub deploy: &'a DeployContext,
    /// State as loaded at the start of the run.
    pub prior: &'a AppliedState,
    /// Signalled when the run is cancelled. Provisioners may finish an
    /// in-flight mutation but should not start new remote work.
    pub cancel: &'a CancellationToken,
}

/// What a successful apply produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applied {
    pub outputs: ResourceOutput,
    /// Set by image builds; persisted so later runs can skip the build.
    pub artifact: Option<BuildArtifact>,
}

impl From<ResourceOutput> for Applied {
    fn from(outputs: ResourceOutput) -> Self {
        Self {
            outputs,
            artifact: None,
        }
    }
}

/// Create-or-update operation for one resource kind.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Kind handled by this provisioner.
    fn kind(&self) -> ResourceKind;

    /// Add derived inputs before hashing, e.g. the content hash of a build
    /// context. The default returns the inputs unchanged.
    async fn resolve_inputs(&self, _name: &str, inputs: ResolvedInputs) -> Result<ResolvedInputs> {
        Ok(inputs)
    }

    /// Create or update the resource and capture its outputs.
    async fn apply(
        &self,
        ctx: &ApplyContext<'_>,
        name: &str,
        inputs: &ResolvedInputs,
    ) -> Result<Applied>;
}
