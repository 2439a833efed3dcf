//! CLI command implementations.

pub mod apply;
pub mod plan;
pub mod state;
pub mod validate;

use anyhow::{Context, Result, bail};
use deployit_config::DeploymentConfig;
use deployit_core::DeployContext;
use deployit_engine::{DeploymentPlan, resolve};
use deployit_state::FileStateStore;
use std::path::{Path, PathBuf};

/// Which deployment file and stack a command operates on.
pub struct Target {
    pub config: PathBuf,
    pub stack: Option<String>,
    pub json: bool,
}

/// A loaded deployment file with its stack selected.
pub struct Loaded {
    pub config: DeploymentConfig,
    pub context: DeployContext,
    /// Directory of the deployment file; relative paths resolve against it.
    pub base_dir: PathBuf,
}

impl Target {
    pub fn load_config(&self) -> Result<DeploymentConfig> {
        DeploymentConfig::load(&self.config)
            .with_context(|| format!("Failed to load {}", self.config.display()))
    }

    pub fn base_dir(&self) -> Result<PathBuf> {
        let dir = match self.config.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        dir.canonicalize()
            .with_context(|| format!("Failed to resolve {}", dir.display()))
    }

    /// Load the file and pick the stack.
    pub fn load(&self) -> Result<Loaded> {
        let config = self.load_config()?;
        let stack = select_stack(&config, self.stack.as_deref())?;
        let context = DeployContext::new(config.settings.project.clone(), stack);
        Ok(Loaded {
            config,
            context,
            base_dir: self.base_dir()?,
        })
    }
}

impl Loaded {
    pub fn plan(&self) -> Result<DeploymentPlan> {
        let declarations = self.config.declarations(&self.context.stack)?;
        resolve(declarations).with_context(|| format!("Invalid stack '{}'", self.context.stack))
    }

    pub fn state_store(&self) -> FileStateStore {
        FileStateStore::new(self.base_dir.join(&self.config.settings.state_path))
    }
}

/// The named stack, or the only one declared.
fn select_stack(config: &DeploymentConfig, stack: Option<&str>) -> Result<String> {
    if let Some(stack) = stack {
        return Ok(stack.to_string());
    }
    let names: Vec<&str> = config.stack_names().collect();
    match names.as_slice() {
        [only] => Ok(only.to_string()),
        [] => bail!("No stacks declared; add a `stack` block"),
        _ => bail!("Several stacks declared ({}); pass --stack", names.join(", ")),
    }
}
