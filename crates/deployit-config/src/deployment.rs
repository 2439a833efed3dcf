//! Deployment file parsing.
//!
//! ```kdl
//! settings {
//!     project "catfacts"
//! }
//!
//! stack "prod" {
//!     resource "catfacts" kind="namespace" {
//!         name "catfacts"
//!     }
//!     resource "postgres" kind="database" depends-on="catfacts" {
//!         namespace "${catfacts.name}"
//!         values {
//!             postgresqlPassword "${secrets.postgresPassword}"
//!         }
//!     }
//! }
//! ```

use deployit_core::{ResourceDeclaration, ResourceKind, Value};
use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::references::parse_string;
use crate::settings::{Settings, parse_settings};
use crate::{ConfigError, ConfigResult};

/// A parsed deployment file.
#[derive(Debug, Clone, Default)]
pub struct DeploymentConfig {
    pub settings: Settings,
    /// Declarations that apply to every stack.
    pub common: Vec<ResourceDeclaration>,
    /// Declarations that apply only when the named stack is selected.
    pub stacks: BTreeMap<String, Vec<ResourceDeclaration>>,
}

impl DeploymentConfig {
    /// Read and parse a deployment file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        parse_deployment(&content)
    }

    /// Declarations for one stack: the common ones plus the stack's own.
    pub fn declarations(&self, stack: &str) -> ConfigResult<Vec<ResourceDeclaration>> {
        let scoped = self
            .stacks
            .get(stack)
            .ok_or_else(|| ConfigError::UnknownStack(stack.to_string()))?;

        let mut seen = BTreeSet::new();
        let mut result = Vec::with_capacity(self.common.len() + scoped.len());
        for decl in self.common.iter().chain(scoped.iter()) {
            if !seen.insert(decl.name().to_string()) {
                return Err(ConfigError::Redeclared(format!(
                    "resource '{}' in stack '{}'",
                    decl.name(),
                    stack
                )));
            }
            result.push(decl.clone());
        }
        Ok(result)
    }

    pub fn stack_names(&self) -> impl Iterator<Item = &str> {
        self.stacks.keys().map(|s| s.as_str())
    }
}

/// Parse a deployment configuration from KDL text.
pub fn parse_deployment(kdl: &str) -> ConfigResult<DeploymentConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = DeploymentConfig::default();
    let mut settings_seen = false;

    for node in doc.nodes() {
        match node.name().value() {
            "settings" => {
                if settings_seen {
                    return Err(ConfigError::Redeclared("settings".to_string()));
                }
                settings_seen = true;
                config.settings = parse_settings(node)?;
            }
            "resource" => {
                config.common.push(parse_resource(node)?);
            }
            "stack" => {
                let name = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("stack name".to_string()))?;
                let mut resources = Vec::new();
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        if child.name().value() != "resource" {
                            return Err(ConfigError::InvalidValue {
                                field: format!("stack '{}'", name),
                                message: format!(
                                    "unexpected node '{}', expected 'resource'",
                                    child.name().value()
                                ),
                            });
                        }
                        resources.push(parse_resource(child)?);
                    }
                }
                if config.stacks.insert(name.clone(), resources).is_some() {
                    return Err(ConfigError::Redeclared(format!("stack '{}'", name)));
                }
            }
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "document".to_string(),
                    message: format!("unknown top-level node '{}'", other),
                });
            }
        }
    }

    Ok(config)
}

fn parse_resource(node: &KdlNode) -> ConfigResult<ResourceDeclaration> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("resource name".to_string()))?;

    let kind_str = get_string_prop(node, "kind")
        .ok_or_else(|| ConfigError::MissingField(format!("kind for resource '{}'", name)))?;
    let kind: ResourceKind = kind_str.parse().map_err(|_| ConfigError::InvalidValue {
        field: format!("kind for resource '{}'", name),
        message: format!("unknown resource kind: {}", kind_str),
    })?;

    let mut decl = ResourceDeclaration::new(&name, kind);
    for dep in get_string_list_prop(node, "depends-on") {
        decl = decl.depends_on(dep);
    }

    if let Some(children) = node.children() {
        let mut keys = BTreeSet::new();
        for child in children.nodes() {
            let key = child.name().value();
            if key == "depends-on" {
                continue;
            }
            if !keys.insert(key.to_string()) {
                return Err(ConfigError::Redeclared(format!("input '{}.{}'", name, key)));
            }
            let value = parse_value(&format!("{}.{}", name, key), child)?;
            decl = decl.input(key, value);
        }
    }

    Ok(decl)
}

/// A child block is a map (or a list when every child is named `-`),
/// one argument is a scalar, several arguments are a list.
fn parse_value(field: &str, node: &KdlNode) -> ConfigResult<Value> {
    let args: Vec<&KdlEntry> = node.entries().iter().filter(|e| e.name().is_none()).collect();

    if let Some(children) = node.children() {
        if !args.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: field.to_string(),
                message: "a value cannot have both arguments and a child block".to_string(),
            });
        }

        let nodes = children.nodes();
        if !nodes.is_empty() && nodes.iter().all(|n| n.name().value() == "-") {
            let items = nodes
                .iter()
                .enumerate()
                .map(|(i, n)| parse_value(&format!("{}[{}]", field, i), n))
                .collect::<ConfigResult<Vec<_>>>()?;
            return Ok(Value::List(items));
        }

        let mut map = BTreeMap::new();
        for child in nodes {
            let key = child.name().value().to_string();
            let value = parse_value(&format!("{}.{}", field, key), child)?;
            if map.insert(key.clone(), value).is_some() {
                return Err(ConfigError::Redeclared(format!("{}.{}", field, key)));
            }
        }
        return Ok(Value::Map(map));
    }

    match args.as_slice() {
        [] => Ok(Value::Null),
        [single] => parse_scalar(field, single.value()),
        many => Ok(Value::List(
            many.iter()
                .map(|e| parse_scalar(field, e.value()))
                .collect::<ConfigResult<Vec<_>>>()?,
        )),
    }
}

fn parse_scalar(field: &str, value: &KdlValue) -> ConfigResult<Value> {
    if let Some(s) = value.as_string() {
        return parse_string(field, s);
    }
    if let Some(b) = value.as_bool() {
        return Ok(Value::Bool(b));
    }
    if let Some(i) = value.as_integer() {
        let n = i64::try_from(i).map_err(|_| ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("integer out of range: {}", i),
        })?;
        return Ok(Value::from(n));
    }
    if let Some(f) = value.as_float() {
        return serde_json::Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: field.to_string(),
                message: format!("non-finite number: {}", f),
            });
    }
    Ok(Value::Null)
}

// Helper functions for extracting values from KDL nodes

pub(crate) fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_first_int_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_string_list_prop(node: &KdlNode, name: &str) -> Vec<String> {
    let mut result = Vec::new();

    // Repeated properties: depends-on="a" depends-on="b"
    for entry in node.entries() {
        if let Some(entry_name) = entry.name() {
            if entry_name.value() == name {
                if let Some(s) = entry.value().as_string() {
                    result.push(s.to_string());
                }
            }
        }
    }

    // Block syntax: depends-on "a" "b"
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() == name {
                result.extend(get_all_string_args(child));
            }
        }
    }

    result
}
