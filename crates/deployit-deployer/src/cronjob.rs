//! `scheduled_job` resources: a Kubernetes `CronJob` running one container.
//!
//! Inputs:
//! - `namespace`, `schedule`, `image` (required)
//! - `name` (defaults to the resource name)
//! - `command`, `args` - string lists
//! - `env` - map of environment variables
//! - `restart-policy` - `Never` (default) or `OnFailure`
//! - `concurrency-policy` - `Allow`, `Forbid` or `Replace`
//! - `backoff-limit`
//!
//! Outputs: `name`, `namespace`, `schedule`.

use async_trait::async_trait;
use deployit_core::provisioner::{Applied, ApplyContext, Provisioner};
use deployit_core::{DeployContext, Error, ResolvedInputs, ResourceKind, ResourceOutput, Result};
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::api::Api;
use std::collections::BTreeMap;

use crate::apply::{managed_labels, server_side_apply};

const RESTART_POLICIES: &[&str] = &["Never", "OnFailure"];
const CONCURRENCY_POLICIES: &[&str] = &["Allow", "Forbid", "Replace"];

pub struct ScheduledJobProvisioner {
    client: Client,
}

impl ScheduledJobProvisioner {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn one_of(field: &str, value: &str, allowed: &[&str]) -> Result<String> {
    if allowed.contains(&value) {
        Ok(value.to_string())
    } else {
        Err(Error::InvalidInput(format!(
            "{} must be one of {}, got '{}'",
            field,
            allowed.join(", "),
            value
        )))
    }
}

/// Cron expressions must have the five standard fields.
fn check_schedule(schedule: &str) -> Result<()> {
    let fields = schedule.split_whitespace().count();
    if fields == 5 || schedule.starts_with('@') {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "schedule '{}' must have 5 fields, found {}",
            schedule, fields
        )))
    }
}

fn non_empty(items: Vec<String>) -> Option<Vec<String>> {
    (!items.is_empty()).then_some(items)
}

/// The CronJob object for a resource.
pub fn build_cronjob(
    deploy: &DeployContext,
    name: &str,
    inputs: &ResolvedInputs,
) -> Result<CronJob> {
    let job_name = inputs.opt_str("name")?.unwrap_or(name).to_string();
    let schedule = inputs.str("schedule")?;
    check_schedule(schedule)?;

    let restart_policy = one_of(
        "restart-policy",
        inputs.opt_str("restart-policy")?.unwrap_or("Never"),
        RESTART_POLICIES,
    )?;
    let concurrency_policy = inputs
        .opt_str("concurrency-policy")?
        .map(|p| one_of("concurrency-policy", p, CONCURRENCY_POLICIES))
        .transpose()?;
    let backoff_limit = inputs
        .opt_u64("backoff-limit")?
        .map(|n| {
            i32::try_from(n)
                .map_err(|_| Error::InvalidInput(format!("backoff-limit {} is too large", n)))
        })
        .transpose()?;

    let env: Vec<EnvVar> = inputs
        .string_map("env")?
        .into_iter()
        .map(|(name, value)| EnvVar {
            name,
            value: Some(value),
            ..Default::default()
        })
        .collect();

    let mut labels = managed_labels(BTreeMap::new(), &deploy.project);
    labels.insert("app.kubernetes.io/name".to_string(), job_name.clone());

    let container = Container {
        name: job_name.clone(),
        image: Some(inputs.str("image")?.to_string()),
        command: non_empty(inputs.string_list("command")?),
        args: non_empty(inputs.string_list("args")?),
        env: (!env.is_empty()).then_some(env),
        ..Default::default()
    };

    Ok(CronJob {
        metadata: ObjectMeta {
            name: Some(job_name),
            namespace: Some(inputs.str("namespace")?.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(CronJobSpec {
            schedule: schedule.to_string(),
            concurrency_policy,
            job_template: JobTemplateSpec {
                metadata: None,
                spec: Some(JobSpec {
                    backoff_limit,
                    template: PodTemplateSpec {
                        metadata: Some(ObjectMeta {
                            labels: Some(labels),
                            ..Default::default()
                        }),
                        spec: Some(PodSpec {
                            restart_policy: Some(restart_policy),
                            containers: vec![container],
                            ..Default::default()
                        }),
                    },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[async_trait]
impl Provisioner for ScheduledJobProvisioner {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ScheduledJob
    }

    async fn apply(
        &self,
        ctx: &ApplyContext<'_>,
        name: &str,
        inputs: &ResolvedInputs,
    ) -> Result<Applied> {
        let object = build_cronjob(ctx.deploy, name, inputs)?;
        let job_name = object.metadata.name.clone().unwrap_or_default();
        let namespace = object.metadata.namespace.clone().unwrap_or_default();
        let schedule = object
            .spec
            .as_ref()
            .map(|s| s.schedule.clone())
            .unwrap_or_default();

        let api: Api<CronJob> = Api::namespaced(self.client.clone(), &namespace);
        server_side_apply(&api, name, &job_name, &object, &ctx.deploy.field_manager()).await?;

        Ok(ResourceOutput::new()
            .with("name", job_name)
            .with("namespace", namespace)
            .with("schedule", schedule)
            .into())
    }
}
