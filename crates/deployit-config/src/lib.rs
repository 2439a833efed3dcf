//! KDL configuration parsing for DeployIt.
//!
//! This crate handles parsing of:
//! - Resource declarations, globally and per stack (deployit.kdl)
//! - Orchestrator settings (state file, registry, secret backend)
//! - `${...}` secret and output references inside input values

pub mod deployment;
pub mod error;
pub mod references;
pub mod settings;

pub use deployment::{DeploymentConfig, parse_deployment};
pub use error::{ConfigError, ConfigResult};
pub use settings::{SecretBackend, Settings};
