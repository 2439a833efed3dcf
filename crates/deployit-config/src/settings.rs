//! Orchestrator settings (`settings { ... }` node).

use kdl::KdlNode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::deployment::{get_first_int_arg, get_first_string_arg, get_string_prop};
use crate::{ConfigError, ConfigResult};

/// Where secrets are read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretBackend {
    /// Environment variables `<PREFIX>_<NAME>`, name upper-cased.
    Env { prefix: String },
    /// A JSON object of name to value, for local development.
    File { path: PathBuf },
}

impl Default for SecretBackend {
    fn default() -> Self {
        SecretBackend::Env {
            prefix: "DEPLOYIT_SECRET".to_string(),
        }
    }
}

/// Orchestrator-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Project name; used as field manager and label value.
    pub project: String,
    /// Path of the JSON state file.
    pub state_path: PathBuf,
    /// Default registry for image builds that don't name a repository.
    pub registry: Option<String>,
    pub secrets: SecretBackend,
    /// Maximum independent resources applied at once.
    pub concurrency: usize,
    /// Helm executable.
    pub helm: String,
    /// How long helm waits for a release to become ready, as a Go
    /// duration (`90s`, `20m`, `1h30m`).
    pub helm_timeout: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project: "deployit".to_string(),
            state_path: PathBuf::from(".deployit/state.json"),
            registry: None,
            secrets: SecretBackend::default(),
            concurrency: 1,
            helm: "helm".to_string(),
            helm_timeout: "1h".to_string(),
        }
    }
}

pub(crate) fn parse_settings(node: &KdlNode) -> ConfigResult<Settings> {
    let mut settings = Settings::default();

    let Some(children) = node.children() else {
        return Ok(settings);
    };

    for child in children.nodes() {
        match child.name().value() {
            "project" => {
                settings.project = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("settings.project".to_string()))?;
            }
            "state-path" | "state_path" => {
                settings.state_path = get_first_string_arg(child)
                    .map(PathBuf::from)
                    .ok_or_else(|| ConfigError::MissingField("settings.state-path".to_string()))?;
            }
            "registry" => {
                settings.registry = get_first_string_arg(child);
            }
            "helm" => {
                settings.helm = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("settings.helm".to_string()))?;
            }
            "helm-timeout" | "helm_timeout" => {
                let timeout = get_first_string_arg(child).ok_or_else(|| {
                    ConfigError::MissingField("settings.helm-timeout".to_string())
                })?;
                if !is_go_duration(&timeout) {
                    return Err(ConfigError::InvalidValue {
                        field: "settings.helm-timeout".to_string(),
                        message: format!("expected a duration like 20m or 1h30m, got '{}'", timeout),
                    });
                }
                settings.helm_timeout = timeout;
            }
            "concurrency" => {
                let value = get_first_int_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("settings.concurrency".to_string()))?;
                settings.concurrency = usize::try_from(value)
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| ConfigError::InvalidValue {
                        field: "settings.concurrency".to_string(),
                        message: format!("must be a positive integer, got {}", value),
                    })?;
            }
            "secrets" => {
                settings.secrets = parse_secret_backend(child)?;
            }
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "settings".to_string(),
                    message: format!("unknown setting '{}'", other),
                });
            }
        }
    }

    Ok(settings)
}

/// One or more `<digits><unit>` pairs, unit one of h, m, s, ms.
fn is_go_duration(s: &str) -> bool {
    let mut rest = s;
    if rest.is_empty() {
        return false;
    }
    while !rest.is_empty() {
        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            return false;
        }
        rest = &rest[digits..];
        rest = if let Some(r) = rest.strip_prefix("ms") {
            r
        } else if let Some(r) = rest.strip_prefix(['h', 'm', 's']) {
            r
        } else {
            return false;
        };
    }
    true
}

fn parse_secret_backend(node: &KdlNode) -> ConfigResult<SecretBackend> {
    let backend = get_string_prop(node, "backend").unwrap_or_else(|| "env".to_string());
    match backend.as_str() {
        "env" => Ok(SecretBackend::Env {
            prefix: get_string_prop(node, "prefix").unwrap_or_else(|| "DEPLOYIT_SECRET".to_string()),
        }),
        "file" => {
            let path = get_string_prop(node, "path")
                .ok_or_else(|| ConfigError::MissingField("secrets path".to_string()))?;
            Ok(SecretBackend::File {
                path: PathBuf::from(path),
            })
        }
        _ => Err(ConfigError::InvalidValue {
            field: "secrets backend".to_string(),
            message: format!("unknown backend: {}", backend),
        }),
    }
}
