//! Explicit run context.

use serde::{Deserialize, Serialize};

/// Selection passed explicitly into the resolver and the engine instead of
/// being read from process-wide state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployContext {
    /// Project name, used as the field manager and in labels.
    pub project: String,
    /// Selected stack (environment), e.g. `prod`.
    pub stack: String,
}

impl DeployContext {
    pub fn new(project: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            stack: stack.into(),
        }
    }

    /// Name used as the server-side-apply field manager.
    pub fn field_manager(&self) -> String {
        format!("deployit-{}", self.project)
    }
}
