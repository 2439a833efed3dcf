//! Server-side apply helper shared by the Kubernetes provisioners.

use deployit_core::{Error, Result};
use kube::Resource;
use kube::api::{Api, Patch, PatchParams};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::info;

use crate::{MANAGED_BY_LABEL, MANAGED_BY_VALUE};

/// Labels every managed object carries, merged over user labels.
pub(crate) fn managed_labels(
    mut labels: BTreeMap<String, String>,
    project: &str,
) -> BTreeMap<String, String> {
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert("deployit.dev/project".to_string(), project.to_string());
    labels
}

/// Apply `object` as `field_manager`, taking ownership of conflicting fields.
pub(crate) async fn server_side_apply<K>(
    api: &Api<K>,
    resource: &str,
    name: &str,
    object: &K,
    field_manager: &str,
) -> Result<K>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned,
{
    let params = PatchParams::apply(field_manager).force();
    let applied = api
        .patch(name, &params, &Patch::Apply(object))
        .await
        .map_err(|e| Error::apply(resource, e))?;
    info!(resource = %resource, object = %name, manager = %field_manager, "Applied object");
    Ok(applied)
}
