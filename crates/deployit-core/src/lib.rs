//! Core domain types and traits for the DeployIt orchestration engine.
//!
//! This crate contains:
//! - Resource declarations and tagged input values
//! - Resource outputs and persisted applied state
//! - Build artifacts and the image backend trait
//! - Collaborator traits (provisioners, secret store, state store)
//! - The explicit deploy context and error taxonomy

pub mod artifact;
pub mod context;
pub mod error;
pub mod id;
pub mod output;
pub mod provisioner;
pub mod resource;
pub mod secret;
pub mod state;
pub mod value;

pub use context::DeployContext;
pub use error::{Error, Result};
pub use id::RunId;
pub use output::ResourceOutput;
pub use resource::{ResourceDeclaration, ResourceKind};
pub use value::{ResolvedInputs, Value};
