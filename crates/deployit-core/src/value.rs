//! Input values and reference resolution.
//!
//! Chart values and other loosely-typed configuration are modelled as a
//! tagged [`Value`] tree. References to secrets and to other resources'
//! outputs are ordinary variants, so resolving a declaration is one
//! recursive walk producing plain JSON.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

use crate::resource::ResourceKind;
use crate::{Error, Result};

/// Reference to a named secret, resolved lazily at apply time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretRef {
    pub name: String,
}

/// Reference to an output of another resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    /// Name of the producing resource.
    pub resource: String,
    /// Output key on that resource.
    pub output: String,
}

/// A declared input value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    String(String),
    Number(serde_json::Number),
    Bool(bool),
    Map(BTreeMap<String, Value>),
    List(Vec<Value>),
    Secret(SecretRef),
    Output(OutputRef),
}

impl Value {
    pub fn secret(name: impl Into<String>) -> Self {
        Value::Secret(SecretRef { name: name.into() })
    }

    pub fn output(resource: impl Into<String>, output: impl Into<String>) -> Self {
        Value::Output(OutputRef {
            resource: resource.into(),
            output: output.into(),
        })
    }

    /// Build a map value from key/value pairs.
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn list<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    pub(crate) fn collect_output_refs(&self, out: &mut BTreeSet<String>) {
        match self {
            Value::Output(r) => {
                out.insert(r.resource.clone());
            }
            Value::Map(m) => m.values().for_each(|v| v.collect_output_refs(out)),
            Value::List(l) => l.iter().for_each(|v| v.collect_output_refs(out)),
            _ => {}
        }
    }

    pub(crate) fn collect_secret_refs(&self, out: &mut BTreeSet<String>) {
        match self {
            Value::Secret(r) => {
                out.insert(r.name.clone());
            }
            Value::Map(m) => m.values().for_each(|v| v.collect_secret_refs(out)),
            Value::List(l) => l.iter().for_each(|v| v.collect_secret_refs(out)),
            _ => {}
        }
    }

    /// Resolve every reference in this value into plain JSON.
    ///
    /// `resource` names the declaring resource and is only used in errors.
    pub fn resolve(&self, resource: &str, refs: &dyn References) -> Result<serde_json::Value> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Map(m) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in m {
                    obj.insert(k.clone(), v.resolve(resource, refs)?);
                }
                serde_json::Value::Object(obj)
            }
            Value::List(l) => serde_json::Value::Array(
                l.iter()
                    .map(|v| v.resolve(resource, refs))
                    .collect::<Result<_>>()?,
            ),
            Value::Secret(r) => refs
                .secret(&r.name)
                .map(|s| serde_json::Value::String(s.to_string()))
                .ok_or_else(|| Error::SecretNotFound(r.name.clone()))?,
            Value::Output(r) => refs
                .output(&r.resource, &r.output)
                .map(serde_json::Value::String)
                .ok_or_else(|| Error::UnresolvedReference {
                    resource: resource.to_string(),
                    target: r.resource.clone(),
                    output: r.output.clone(),
                })?,
        })
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

/// Source of concrete values for references during resolution.
pub trait References {
    /// Output `output` of resource `resource`, if that resource has completed.
    fn output(&self, resource: &str, output: &str) -> Option<String>;

    /// Plaintext of secret `name`, if it was resolved for this run.
    fn secret(&self, name: &str) -> Option<&str>;
}

/// Fully resolved inputs of one resource.
///
/// May contain secret plaintext, so `Debug` prints keys only and the type
/// is never serialized to the state store.
#[derive(Clone, Default, PartialEq)]
pub struct ResolvedInputs {
    values: BTreeMap<String, serde_json::Value>,
}

impl std::fmt::Debug for ResolvedInputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedInputs")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ResolvedInputs {
    /// Resolve all declared inputs.
    pub fn resolve(
        resource: &str,
        inputs: &BTreeMap<String, Value>,
        refs: &dyn References,
    ) -> Result<Self> {
        let mut values = BTreeMap::new();
        for (key, value) in inputs {
            values.insert(key.clone(), value.resolve(resource, refs)?);
        }
        Ok(Self { values })
    }

    pub fn from_values(values: BTreeMap<String, serde_json::Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Required string input.
    pub fn str(&self, key: &str) -> Result<&str> {
        self.opt_str(key)?
            .ok_or_else(|| Error::InvalidInput(format!("missing required input '{}'", key)))
    }

    /// Optional string input. Present but non-string is an error.
    pub fn opt_str(&self, key: &str) -> Result<Option<&str>> {
        match self.values.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(Error::InvalidInput(format!(
                "input '{}' must be a string",
                key
            ))),
        }
    }

    /// Optional list of strings. A single string is accepted as a one-element list.
    pub fn string_list(&self, key: &str) -> Result<Vec<String>> {
        match self.values.get(key) {
            None | Some(serde_json::Value::Null) => Ok(Vec::new()),
            Some(serde_json::Value::String(s)) => Ok(vec![s.clone()]),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str().map(str::to_string).ok_or_else(|| {
                        Error::InvalidInput(format!("input '{}' must contain only strings", key))
                    })
                })
                .collect(),
            Some(_) => Err(Error::InvalidInput(format!(
                "input '{}' must be a list of strings",
                key
            ))),
        }
    }

    /// Optional map of scalar values rendered as strings (env vars, build args).
    pub fn string_map(&self, key: &str) -> Result<BTreeMap<String, String>> {
        match self.values.get(key) {
            None | Some(serde_json::Value::Null) => Ok(BTreeMap::new()),
            Some(serde_json::Value::Object(obj)) => obj
                .iter()
                .map(|(k, v)| match v {
                    serde_json::Value::String(s) => Ok((k.clone(), s.clone())),
                    serde_json::Value::Number(n) => Ok((k.clone(), n.to_string())),
                    serde_json::Value::Bool(b) => Ok((k.clone(), b.to_string())),
                    _ => Err(Error::InvalidInput(format!(
                        "input '{}.{}' must be a scalar",
                        key, k
                    ))),
                })
                .collect(),
            Some(_) => Err(Error::InvalidInput(format!("input '{}' must be a map", key))),
        }
    }

    /// Optional unsigned integer input.
    pub fn opt_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.values.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => v.as_u64().map(Some).ok_or_else(|| {
                Error::InvalidInput(format!("input '{}' must be a non-negative integer", key))
            }),
        }
    }

    /// Optional nested object, cloned as JSON (chart values).
    pub fn object(&self, key: &str) -> Result<serde_json::Map<String, serde_json::Value>> {
        match self.values.get(key) {
            None | Some(serde_json::Value::Null) => Ok(serde_json::Map::new()),
            Some(serde_json::Value::Object(obj)) => Ok(obj.clone()),
            Some(_) => Err(Error::InvalidInput(format!("input '{}' must be a map", key))),
        }
    }

    /// SHA-256 over the canonical JSON encoding of kind and inputs, hex encoded.
    pub fn digest(&self, kind: ResourceKind) -> String {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0u8]);
        // BTreeMap keys serialize in order, so the encoding is canonical.
        let encoded = serde_json::to_vec(&self.values).unwrap_or_default();
        hasher.update(&encoded);
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Fixed {
        outputs: HashMap<(String, String), String>,
        secrets: HashMap<String, String>,
    }

    impl References for Fixed {
        fn output(&self, resource: &str, output: &str) -> Option<String> {
            self.outputs
                .get(&(resource.to_string(), output.to_string()))
                .cloned()
        }

        fn secret(&self, name: &str) -> Option<&str> {
            self.secrets.get(name).map(|s| s.as_str())
        }
    }

    fn fixed() -> Fixed {
        let mut outputs = HashMap::new();
        outputs.insert(
            ("postgres".to_string(), "host".to_string()),
            "postgres-postgresql".to_string(),
        );
        let mut secrets = HashMap::new();
        secrets.insert("postgresPassword".to_string(), "hunter2".to_string());
        Fixed { outputs, secrets }
    }

    #[test]
    fn test_resolve_nested_references() {
        let value = Value::map([
            ("CF_DB_HOST", Value::output("postgres", "host")),
            ("CF_DB_PASSWORD", Value::secret("postgresPassword")),
            ("ports", Value::list([Value::from(5432i64)])),
        ]);

        let resolved = value.resolve("api", &fixed()).unwrap();
        assert_eq!(resolved["CF_DB_HOST"], "postgres-postgresql");
        assert_eq!(resolved["CF_DB_PASSWORD"], "hunter2");
        assert_eq!(resolved["ports"][0], 5432);
    }

    #[test]
    fn test_missing_output_is_unresolved_reference() {
        let value = Value::output("api-image", "image");
        let err = value.resolve("api", &fixed()).unwrap_err();
        assert!(matches!(
            err,
            Error::UnresolvedReference { ref target, .. } if target == "api-image"
        ));
    }

    #[test]
    fn test_missing_secret() {
        let err = Value::secret("twilio_auth_token")
            .resolve("api", &fixed())
            .unwrap_err();
        assert!(matches!(err, Error::SecretNotFound(ref n) if n == "twilio_auth_token"));
    }

    #[test]
    fn test_digest_is_stable_and_kind_sensitive() {
        let mut inputs = BTreeMap::new();
        inputs.insert("name".to_string(), Value::from("catfacts"));
        let resolved = ResolvedInputs::resolve("ns", &inputs, &fixed()).unwrap();

        let a = resolved.digest(ResourceKind::Namespace);
        let b = resolved.clone().digest(ResourceKind::Namespace);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, resolved.digest(ResourceKind::Chart));
    }

    #[test]
    fn test_debug_hides_values() {
        let mut resolved = ResolvedInputs::default();
        resolved.insert("password", serde_json::json!("hunter2"));
        let rendered = format!("{:?}", resolved);
        assert!(rendered.contains("password"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_typed_accessors() {
        let mut resolved = ResolvedInputs::default();
        resolved.insert("command", serde_json::json!(["cf"]));
        resolved.insert("args", serde_json::json!("blast"));
        resolved.insert("env", serde_json::json!({"A": "1", "B": 2, "C": true}));
        resolved.insert("replicas", serde_json::json!(2));

        assert_eq!(resolved.string_list("command").unwrap(), vec!["cf"]);
        assert_eq!(resolved.string_list("args").unwrap(), vec!["blast"]);
        assert_eq!(resolved.string_map("env").unwrap()["B"], "2");
        assert_eq!(resolved.opt_u64("replicas").unwrap(), Some(2));
        assert!(resolved.str("missing").is_err());
        assert!(resolved.str("command").is_err());
    }
}
