//! Secret resolution for a single run, plus the bundled secret stores.

use async_trait::async_trait;
use deployit_core::secret::SecretStore;
use deployit_core::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// Fetches each secret at most once per run.
///
/// Misses are remembered as well, so a second resource needing an absent
/// secret fails without another backend lookup. Backend errors other than
/// "not found" are not cached.
pub struct SecretProvider {
    store: Arc<dyn SecretStore>,
    cache: Mutex<HashMap<String, Option<Arc<SecretString>>>>,
}

impl SecretProvider {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve one secret.
    pub async fn resolve(&self, name: &str) -> Result<Arc<SecretString>> {
        // Held across the lookup so concurrent resources share one fetch.
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(name) {
            return cached
                .clone()
                .ok_or_else(|| Error::SecretNotFound(name.to_string()));
        }

        debug!(secret = %name, backend = %self.store.name(), "Fetching secret");
        match self.store.get(name).await {
            Ok(value) => {
                let value = Arc::new(value);
                cache.insert(name.to_string(), Some(value.clone()));
                Ok(value)
            }
            Err(Error::SecretNotFound(_)) => {
                cache.insert(name.to_string(), None);
                Err(Error::SecretNotFound(name.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve every named secret, failing on the first miss.
    pub async fn resolve_all<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<ResolvedSecrets> {
        let mut resolved = HashMap::new();
        for name in names {
            resolved.insert(name.to_string(), self.resolve(name).await?);
        }
        Ok(ResolvedSecrets(resolved))
    }
}

/// Secrets resolved for one resource.
#[derive(Default)]
pub struct ResolvedSecrets(HashMap<String, Arc<SecretString>>);

impl ResolvedSecrets {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|s| s.expose_secret())
    }
}

/// In-memory secret store. Counts backend lookups.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: HashMap<String, String>,
    lookups: AtomicUsize,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }

    /// Number of `get` calls made so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, name: &str) -> Result<SecretString> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.secrets
            .get(name)
            .map(|v| SecretString::from(v.clone()))
            .ok_or_else(|| Error::SecretNotFound(name.to_string()))
    }
}

/// Reads secrets from environment variables named `<PREFIX>_<NAME>`.
///
/// `NAME` is upper-cased and anything that is not alphanumeric becomes `_`,
/// so `postgresPassword` is read from `DEPLOYIT_SECRET_POSTGRESPASSWORD`.
pub struct EnvSecretStore {
    prefix: String,
}

impl EnvSecretStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn variable_name(&self, name: &str) -> String {
        let suffix: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        if self.prefix.is_empty() {
            suffix
        } else {
            format!("{}_{}", self.prefix, suffix)
        }
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    fn name(&self) -> &'static str {
        "env"
    }

    async fn get(&self, name: &str) -> Result<SecretString> {
        std::env::var(self.variable_name(name))
            .map(SecretString::from)
            .map_err(|_| Error::SecretNotFound(name.to_string()))
    }
}

/// Reads secrets from a JSON object of name to string value.
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, name: &str) -> Result<SecretString> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Internal(format!(
                "failed to read secrets file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let secrets: HashMap<String, String> = serde_json::from_str(&content).map_err(|e| {
            Error::Internal(format!(
                "invalid secrets file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        secrets
            .get(name)
            .map(|v| SecretString::from(v.clone()))
            .ok_or_else(|| Error::SecretNotFound(name.to_string()))
    }
}
