//! Secret storage abstraction.

use async_trait::async_trait;
use secrecy::SecretString;

use crate::Result;

/// Trait for secret storage backends.
///
/// Implementations return [`crate::Error::SecretNotFound`] for unknown names;
/// any other error is treated as a backend failure.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Name of this backend, for logs.
    fn name(&self) -> &'static str;

    /// Look up a secret by name.
    async fn get(&self, name: &str) -> Result<SecretString>;
}
