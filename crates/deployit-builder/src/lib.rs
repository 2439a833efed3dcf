//! Image builds for DeployIt.
//!
//! Images are tagged with the content hash of their build context, built and
//! pushed at most once per distinct hash, and recorded as build artifacts so
//! later runs can skip them entirely.

pub mod builder;
pub mod context;
pub mod docker;
pub mod provisioner;

pub use builder::ImageBuilder;
pub use context::{archive_context, hash_context, hash_directory};
pub use docker::DockerBackend;
pub use provisioner::ImageBuildProvisioner;
