//! Cluster provisioners for DeployIt.
//!
//! Namespaces and scheduled jobs are written with Kubernetes server-side
//! apply; charts and databases are installed as Helm releases.

mod apply;
pub mod chart;
pub mod cronjob;
pub mod database;
pub mod helm;
pub mod namespace;

pub use chart::ChartProvisioner;
pub use cronjob::ScheduledJobProvisioner;
pub use database::DatabaseProvisioner;
pub use helm::{HelmCli, ReleaseInstaller, ReleaseSpec, ReleaseStatus};
pub use namespace::NamespaceProvisioner;

/// Label put on every object this crate creates.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "deployit";
