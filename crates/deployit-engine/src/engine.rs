//! Apply engine - walks a deployment plan and converges each resource.

use chrono::Utc;
use deployit_core::provisioner::{ApplyContext, Provisioner};
use deployit_core::secret::SecretStore;
use deployit_core::state::{AppliedRecord, AppliedState, StateStore, short_hash};
use deployit_core::value::References;
use deployit_core::{
    DeployContext, Error, ResolvedInputs, ResourceDeclaration, ResourceKind, ResourceOutput,
    Result, RunId,
};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::graph::DeploymentPlan;
use crate::report::{ResourceOutcome, RunReport};
use crate::secrets::{ResolvedSecrets, SecretProvider};

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Maximum number of independent resources applied at once.
    pub concurrency: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

/// Event emitted while a run progresses.
#[derive(Debug, Clone)]
pub enum ApplyEvent {
    ResourceStarted { resource: String },
    ResourceFinished {
        resource: String,
        outcome: ResourceOutcome,
    },
}

/// Applies deployment plans using one provisioner per resource kind.
pub struct ApplyEngine {
    provisioners: HashMap<ResourceKind, Arc<dyn Provisioner>>,
    secrets: Arc<dyn SecretStore>,
    options: EngineOptions,
    events: Option<mpsc::Sender<ApplyEvent>>,
}

/// A resource that reached `Applied` or `SkippedUnchanged`.
struct Completed {
    outcome: ResourceOutcome,
    record: AppliedRecord,
}

enum Readiness {
    Ready,
    Waiting,
    Blocked(String),
}

/// Outputs of completed dependencies plus the secrets of one resource.
struct RunReferences<'a> {
    outputs: &'a HashMap<String, ResourceOutput>,
    secrets: &'a ResolvedSecrets,
}

impl References for RunReferences<'_> {
    fn output(&self, resource: &str, output: &str) -> Option<String> {
        self.outputs
            .get(resource)?
            .get(output)
            .map(str::to_string)
    }

    fn secret(&self, name: &str) -> Option<&str> {
        self.secrets.get(name)
    }
}

impl ApplyEngine {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            provisioners: HashMap::new(),
            secrets,
            options: EngineOptions::default(),
            events: None,
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Send progress events to `tx`. A dropped receiver is ignored.
    pub fn with_events(mut self, tx: mpsc::Sender<ApplyEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Register the provisioner for its kind, replacing any earlier one.
    pub fn register(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioners.insert(provisioner.kind(), provisioner);
        self
    }

    /// Load state, apply the plan, and save the resulting state once.
    ///
    /// A load failure aborts before anything is applied. A save failure is
    /// reported in [`RunReport::store_error`] alongside the outcomes.
    pub async fn run(
        &self,
        ctx: &DeployContext,
        plan: &DeploymentPlan,
        store: &dyn StateStore,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        let prior = store.load().await?;
        debug!(backend = %store.name(), resources = prior.len(), "Loaded applied state");

        let mut report = self.apply(ctx, plan, &prior, cancel).await;

        match store.save(&report.state).await {
            Ok(()) => {
                info!(backend = %store.name(), resources = report.state.len(), "State saved");
            }
            Err(e) => {
                error!(backend = %store.name(), error = %e, "Failed to save state; applied resources are not recorded");
                report.store_error = Some(e.to_string());
            }
        }

        Ok(report)
    }

    /// Apply `plan` against `prior` and return every resource's outcome
    /// together with the state to persist.
    ///
    /// A resource starts only after all of its dependencies are applied or
    /// unchanged. Dependents of a failed resource are blocked; unrelated
    /// resources continue. A fatal error or cancellation stops new work
    /// while in-flight resources finish.
    pub async fn apply(
        &self,
        ctx: &DeployContext,
        plan: &DeploymentPlan,
        prior: &AppliedState,
        cancel: CancellationToken,
    ) -> RunReport {
        let run_id = RunId::new();
        let limit = self.options.concurrency.max(1);
        let secrets = SecretProvider::new(self.secrets.clone());

        info!(%run_id, stack = %ctx.stack, resources = plan.len(), concurrency = limit, "Starting apply");

        let mut outcomes: HashMap<String, ResourceOutcome> = HashMap::new();
        let mut outputs: HashMap<String, ResourceOutput> = HashMap::new();
        let mut records: HashMap<String, AppliedRecord> = HashMap::new();
        let mut pending: Vec<&ResourceDeclaration> = plan.iter().collect();
        let mut aborted: Option<String> = None;
        let mut in_flight = FuturesUnordered::new();

        loop {
            if aborted.is_none() && !cancel.is_cancelled() {
                let mut idx = 0;
                while idx < pending.len() {
                    let decl = pending[idx];
                    match readiness(plan, decl.name(), &outcomes) {
                        Readiness::Waiting => idx += 1,
                        Readiness::Blocked(by) => {
                            warn!(resource = %decl.name(), blocked_by = %by, "Skipping resource due to failed dependency");
                            let outcome = ResourceOutcome::Blocked { by };
                            self.emit(ApplyEvent::ResourceFinished {
                                resource: decl.name().to_string(),
                                outcome: outcome.clone(),
                            })
                            .await;
                            outcomes.insert(decl.name().to_string(), outcome);
                            pending.remove(idx);
                        }
                        Readiness::Ready if in_flight.len() >= limit => idx += 1,
                        Readiness::Ready => {
                            let upstream: HashMap<String, ResourceOutput> = plan
                                .dependencies_of(decl.name())
                                .filter_map(|d| outputs.get(d).map(|o| (d.to_string(), o.clone())))
                                .collect();
                            let dependency_applied = plan
                                .dependencies_of(decl.name())
                                .any(|d| matches!(outcomes.get(d), Some(ResourceOutcome::Applied)));

                            self.emit(ApplyEvent::ResourceStarted {
                                resource: decl.name().to_string(),
                            })
                            .await;
                            in_flight.push(self.converge(
                                ctx,
                                decl,
                                upstream,
                                dependency_applied,
                                prior,
                                &secrets,
                                &cancel,
                            ));
                            pending.remove(idx);
                        }
                    }
                }
            }

            let Some((name, result)) = in_flight.next().await else {
                break;
            };

            let outcome = match result {
                Ok(done) => {
                    outputs.insert(name.clone(), done.record.outputs.clone());
                    records.insert(name.clone(), done.record);
                    done.outcome
                }
                Err(Error::Cancelled) => {
                    info!(resource = %name, "Run cancelled before resource was applied");
                    ResourceOutcome::Cancelled
                }
                Err(e) => {
                    error!(resource = %name, error = %e, "Resource failed");
                    if e.is_fatal() && aborted.is_none() {
                        aborted = Some(format!("{}: {}", name, e));
                    }
                    ResourceOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };

            self.emit(ApplyEvent::ResourceFinished {
                resource: name.clone(),
                outcome: outcome.clone(),
            })
            .await;
            outcomes.insert(name, outcome);
        }

        // Whatever is left never started: blocked by a failure seen before
        // the stop, or cut off by cancellation or a fatal error.
        for decl in pending {
            let outcome = match readiness(plan, decl.name(), &outcomes) {
                Readiness::Blocked(by) => ResourceOutcome::Blocked { by },
                _ => ResourceOutcome::Cancelled,
            };
            outcomes.insert(decl.name().to_string(), outcome);
        }

        let mut state = AppliedState::new();
        let mut ordered = Vec::with_capacity(plan.len());
        // Resources whose dependents must re-apply next run: applied this
        // run, or left unfinished downstream of something that was.
        let mut changed: HashSet<String> = HashSet::new();
        for decl in plan.iter() {
            let name = decl.name();
            let outcome = outcomes
                .remove(name)
                .unwrap_or(ResourceOutcome::Cancelled);
            let record = match &outcome {
                ResourceOutcome::Applied => {
                    changed.insert(name.to_string());
                    records.remove(name)
                }
                ResourceOutcome::SkippedUnchanged => records.remove(name),
                ResourceOutcome::Blocked { .. } | ResourceOutcome::Cancelled
                    if plan.dependencies_of(name).any(|d| changed.contains(d)) =>
                {
                    debug!(resource = %name, "Dropping record; a dependency changed this run");
                    changed.insert(name.to_string());
                    None
                }
                // Untouched this run; the last applied record is still accurate.
                ResourceOutcome::Blocked { .. } | ResourceOutcome::Cancelled => {
                    prior.get(name).cloned()
                }
                // Forces a re-apply next run.
                ResourceOutcome::Failed { .. } => None,
            };
            if let Some(record) = record {
                state.insert(name, record);
            }
            ordered.push((name.to_string(), outcome));
        }

        let report = RunReport {
            run_id,
            stack: ctx.stack.clone(),
            outcomes: ordered,
            state,
            aborted,
            cancelled: cancel.is_cancelled(),
            store_error: None,
        };

        info!(
            %run_id,
            applied = report.applied().len(),
            unchanged = report.skipped().len(),
            failed = report.failed().len(),
            blocked = report.blocked().len(),
            "Apply finished"
        );

        report
    }

    #[allow(clippy::too_many_arguments)]
    async fn converge(
        &self,
        ctx: &DeployContext,
        decl: &ResourceDeclaration,
        upstream: HashMap<String, ResourceOutput>,
        dependency_applied: bool,
        prior: &AppliedState,
        secrets: &SecretProvider,
        cancel: &CancellationToken,
    ) -> (String, Result<Completed>) {
        let result = self
            .converge_inner(ctx, decl, &upstream, dependency_applied, prior, secrets, cancel)
            .await;
        (decl.name().to_string(), result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn converge_inner(
        &self,
        ctx: &DeployContext,
        decl: &ResourceDeclaration,
        upstream: &HashMap<String, ResourceOutput>,
        dependency_applied: bool,
        prior: &AppliedState,
        secrets: &SecretProvider,
        cancel: &CancellationToken,
    ) -> Result<Completed> {
        let name = decl.name();
        let kind = decl.kind();
        let provisioner = self
            .provisioners
            .get(&kind)
            .ok_or(Error::NoProvisioner(kind))?;

        let secret_names = decl.secret_names();
        let resolved_secrets = secrets
            .resolve_all(secret_names.iter().map(String::as_str))
            .await?;
        let refs = RunReferences {
            outputs: upstream,
            secrets: &resolved_secrets,
        };
        let inputs = ResolvedInputs::resolve(name, decl.inputs(), &refs)?;
        let inputs = provisioner.resolve_inputs(name, inputs).await?;
        let input_hash = inputs.digest(kind);
        debug!(resource = %name, hash = %short_hash(&input_hash), "Resolved inputs");

        if !dependency_applied {
            if let Some(record) = prior
                .get(name)
                .filter(|r| r.kind == kind && r.input_hash == input_hash)
            {
                info!(resource = %name, kind = %kind, hash = %record.short_hash(), "Unchanged, skipping");
                return Ok(Completed {
                    outcome: ResourceOutcome::SkippedUnchanged,
                    record: record.clone(),
                });
            }
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        info!(resource = %name, kind = %kind, hash = %short_hash(&input_hash), "Applying resource");
        let apply_ctx = ApplyContext {
            deploy: ctx,
            prior,
            cancel,
        };
        let applied = provisioner.apply(&apply_ctx, name, &inputs).await?;
        info!(resource = %name, kind = %kind, "Resource applied");

        Ok(Completed {
            outcome: ResourceOutcome::Applied,
            record: AppliedRecord {
                kind,
                input_hash,
                outputs: applied.outputs,
                artifact: applied.artifact,
                last_applied_at: Utc::now(),
            },
        })
    }

    async fn emit(&self, event: ApplyEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}

fn readiness(
    plan: &DeploymentPlan,
    name: &str,
    outcomes: &HashMap<String, ResourceOutcome>,
) -> Readiness {
    let mut waiting = false;
    for dep in plan.dependencies_of(name) {
        match outcomes.get(dep) {
            Some(o) if o.is_complete() => {}
            Some(ResourceOutcome::Failed { .. }) => return Readiness::Blocked(dep.to_string()),
            // Point at the root failure rather than the intermediate resource.
            Some(ResourceOutcome::Blocked { by }) => return Readiness::Blocked(by.clone()),
            _ => waiting = true,
        }
    }
    if waiting {
        Readiness::Waiting
    } else {
        Readiness::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::resolve;
    use crate::secrets::MemorySecretStore;
    use async_trait::async_trait;
    use deployit_core::Value;
    use deployit_core::provisioner::Applied;
    use std::sync::Mutex;

    /// Records apply calls and echoes inputs back as outputs.
    struct Echo {
        kind: ResourceKind,
        calls: Mutex<Vec<String>>,
    }

    impl Echo {
        fn new(kind: ResourceKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Provisioner for Echo {
        fn kind(&self) -> ResourceKind {
            self.kind
        }

        async fn apply(
            &self,
            _ctx: &ApplyContext<'_>,
            name: &str,
            inputs: &ResolvedInputs,
        ) -> Result<Applied> {
            self.calls.lock().unwrap().push(name.to_string());
            let mut outputs = ResourceOutput::new().with("name", name);
            if let Some(v) = inputs.opt_str("value")? {
                outputs.insert("value", v);
            }
            Ok(outputs.into())
        }
    }

    fn ctx() -> DeployContext {
        DeployContext::new("catfacts", "prod")
    }

    #[tokio::test]
    async fn test_outputs_flow_to_dependents() {
        let charts = Echo::new(ResourceKind::Chart);
        let engine = ApplyEngine::new(Arc::new(MemorySecretStore::new())).register(charts.clone());

        let plan = resolve(vec![
            ResourceDeclaration::new("a", ResourceKind::Chart).input("value", "hello"),
            ResourceDeclaration::new("b", ResourceKind::Chart)
                .input("value", Value::output("a", "value")),
        ])
        .unwrap();

        let report = engine
            .apply(&ctx(), &plan, &AppliedState::new(), CancellationToken::new())
            .await;

        assert!(report.is_success());
        assert_eq!(
            report.state.get("b").unwrap().outputs.get("value"),
            Some("hello")
        );
    }

    #[tokio::test]
    async fn test_missing_output_aborts_run() {
        let charts = Echo::new(ResourceKind::Chart);
        let engine = ApplyEngine::new(Arc::new(MemorySecretStore::new())).register(charts.clone());

        let plan = resolve(vec![
            ResourceDeclaration::new("a", ResourceKind::Chart),
            ResourceDeclaration::new("b", ResourceKind::Chart)
                .input("value", Value::output("a", "nope")),
            ResourceDeclaration::new("c", ResourceKind::Chart).depends_on("b"),
            ResourceDeclaration::new("d", ResourceKind::Chart).depends_on("a"),
        ])
        .unwrap();

        let report = engine
            .apply(&ctx(), &plan, &AppliedState::new(), CancellationToken::new())
            .await;

        assert!(report.aborted.is_some());
        assert!(matches!(
            report.outcome("b"),
            Some(ResourceOutcome::Failed { .. })
        ));
        assert_eq!(
            report.outcome("c"),
            Some(&ResourceOutcome::Blocked { by: "b".to_string() })
        );
        // d was ready but nothing new starts after a fatal error.
        assert_eq!(report.outcome("d"), Some(&ResourceOutcome::Cancelled));
        assert_eq!(*charts.calls.lock().unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_missing_provisioner_fails_resource() {
        let engine = ApplyEngine::new(Arc::new(MemorySecretStore::new()));
        let plan = resolve(vec![ResourceDeclaration::new("ns", ResourceKind::Namespace)]).unwrap();

        let report = engine
            .apply(&ctx(), &plan, &AppliedState::new(), CancellationToken::new())
            .await;

        assert_eq!(report.failed(), vec!["ns"]);
        assert!(report.aborted.is_none());
    }

    #[tokio::test]
    async fn test_kind_change_forces_reapply() {
        let charts = Echo::new(ResourceKind::Chart);
        let jobs = Echo::new(ResourceKind::ScheduledJob);
        let engine = ApplyEngine::new(Arc::new(MemorySecretStore::new()))
            .register(charts.clone())
            .register(jobs.clone());

        let first = resolve(vec![ResourceDeclaration::new("x", ResourceKind::Chart)]).unwrap();
        let report = engine
            .apply(&ctx(), &first, &AppliedState::new(), CancellationToken::new())
            .await;

        let second = resolve(vec![ResourceDeclaration::new("x", ResourceKind::ScheduledJob)]).unwrap();
        let report = engine
            .apply(&ctx(), &second, &report.state, CancellationToken::new())
            .await;

        assert_eq!(report.applied(), vec!["x"]);
        assert_eq!(jobs.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let (tx, mut rx) = mpsc::channel(16);
        let engine = ApplyEngine::new(Arc::new(MemorySecretStore::new()))
            .register(Echo::new(ResourceKind::Namespace))
            .with_events(tx);

        let plan = resolve(vec![ResourceDeclaration::new("ns", ResourceKind::Namespace)]).unwrap();
        engine
            .apply(&ctx(), &plan, &AppliedState::new(), CancellationToken::new())
            .await;
        drop(engine);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(&events[0], ApplyEvent::ResourceStarted { resource } if resource == "ns"));
        assert!(matches!(
            &events[1],
            ApplyEvent::ResourceFinished { outcome: ResourceOutcome::Applied, .. }
        ));
    }
}
