//! `namespace` resources.
//!
//! Inputs: `name` (defaults to the resource name), `labels` (map).
//! Outputs: `name`.

use async_trait::async_trait;
use deployit_core::provisioner::{Applied, ApplyContext, Provisioner};
use deployit_core::{DeployContext, ResolvedInputs, ResourceKind, ResourceOutput, Result};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::api::Api;

use crate::apply::{managed_labels, server_side_apply};

pub struct NamespaceProvisioner {
    client: Client,
}

impl NamespaceProvisioner {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// The namespace object for a resource.
pub fn build_namespace(
    deploy: &DeployContext,
    name: &str,
    inputs: &ResolvedInputs,
) -> Result<Namespace> {
    let namespace = inputs.opt_str("name")?.unwrap_or(name);
    Ok(Namespace {
        metadata: ObjectMeta {
            name: Some(namespace.to_string()),
            labels: Some(managed_labels(inputs.string_map("labels")?, &deploy.project)),
            ..Default::default()
        },
        ..Default::default()
    })
}

#[async_trait]
impl Provisioner for NamespaceProvisioner {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Namespace
    }

    async fn apply(
        &self,
        ctx: &ApplyContext<'_>,
        name: &str,
        inputs: &ResolvedInputs,
    ) -> Result<Applied> {
        let object = build_namespace(ctx.deploy, name, inputs)?;
        let namespace = object.metadata.name.clone().unwrap_or_default();

        let api: Api<Namespace> = Api::all(self.client.clone());
        server_side_apply(&api, name, &namespace, &object, &ctx.deploy.field_manager()).await?;

        Ok(ResourceOutput::new().with("name", namespace).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn inputs(pairs: serde_json::Value) -> ResolvedInputs {
        let serde_json::Value::Object(map) = pairs else {
            panic!("expected an object");
        };
        ResolvedInputs::from_values(map.into_iter().collect::<BTreeMap<_, _>>())
    }

    #[test]
    fn test_namespace_name_and_labels() {
        let deploy = DeployContext::new("catfacts", "prod");
        let ns = build_namespace(
            &deploy,
            "catfacts-ns",
            &inputs(serde_json::json!({"name": "catfacts", "labels": {"team": "sms"}})),
        )
        .unwrap();

        assert_eq!(ns.metadata.name.as_deref(), Some("catfacts"));
        let labels = ns.metadata.labels.unwrap();
        assert_eq!(labels["team"], "sms");
        assert_eq!(labels[crate::MANAGED_BY_LABEL], "deployit");
        assert_eq!(labels["deployit.dev/project"], "catfacts");
    }

    #[test]
    fn test_name_defaults_to_resource() {
        let deploy = DeployContext::new("catfacts", "prod");
        let ns = build_namespace(&deploy, "catfacts", &inputs(serde_json::json!({}))).unwrap();
        assert_eq!(ns.metadata.name.as_deref(), Some("catfacts"));
    }

    #[test]
    fn test_serialized_for_server_side_apply() {
        let deploy = DeployContext::new("catfacts", "prod");
        let ns = build_namespace(&deploy, "catfacts", &inputs(serde_json::json!({}))).unwrap();
        let json = serde_json::to_value(&ns).unwrap();
        assert_eq!(json["apiVersion"], "v1");
        assert_eq!(json["kind"], "Namespace");
    }
}
