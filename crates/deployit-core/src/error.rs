//! Error types for DeployIt.

use thiserror::Error;

use crate::resource::ResourceKind;

#[derive(Debug, Error)]
pub enum Error {
    #[error("dependency cycle detected between: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("resource '{resource}' depends on unknown resource '{dependency}'")]
    UnknownDependency { resource: String, dependency: String },

    #[error("duplicate resource: {0}")]
    DuplicateResource(String),

    #[error("resource '{resource}' references missing output '{target}.{output}'")]
    UnresolvedReference {
        resource: String,
        target: String,
        output: String,
    },

    #[error("secret not found: {0}")]
    SecretNotFound(String),

    #[error("image build failed: {0}")]
    Build(String),

    #[error("state store error: {0}")]
    Store(String),

    #[error("apply failed for '{resource}': {message}")]
    Apply { resource: String, message: String },

    #[error("no provisioner registered for kind '{0}'")]
    NoProvisioner(ResourceKind),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a collaborator failure while applying `resource`.
    pub fn apply(resource: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Apply {
            resource: resource.into(),
            message: message.to_string(),
        }
    }

    /// Errors that abort the whole run instead of only the resource that hit them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Cycle(_)
                | Error::UnresolvedReference { .. }
                | Error::Build(_)
                | Error::Store(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
