//! Resource orchestration for DeployIt.
//!
//! Resolves declarations into an ordered plan, applies it with
//! skip-if-unchanged semantics, and reports the outcome of every resource.

pub mod engine;
pub mod graph;
pub mod report;
pub mod secrets;

pub use engine::{ApplyEngine, ApplyEvent, EngineOptions};
pub use graph::{DeploymentPlan, resolve};
pub use report::{ResourceOutcome, RunReport};
pub use secrets::{
    EnvSecretStore, FileSecretStore, MemorySecretStore, ResolvedSecrets, SecretProvider,
};
