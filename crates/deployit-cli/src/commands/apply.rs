//! `deployit apply` - converge the selected stack.

use anyhow::{Context, Result};
use deployit_builder::{DockerBackend, ImageBuildProvisioner, ImageBuilder};
use deployit_config::{SecretBackend, Settings};
use deployit_core::ResourceKind;
use deployit_core::secret::SecretStore;
use deployit_deployer::{
    ChartProvisioner, DatabaseProvisioner, HelmCli, NamespaceProvisioner,
    ScheduledJobProvisioner,
};
use deployit_engine::{
    ApplyEngine, ApplyEvent, DeploymentPlan, EngineOptions, EnvSecretStore, FileSecretStore,
    ResourceOutcome,
};
use kube::Client;
use kube::config::{Config, KubeConfigOptions};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Target;

fn secret_store(settings: &Settings, base_dir: &Path) -> Arc<dyn SecretStore> {
    match &settings.secrets {
        SecretBackend::Env { prefix } => Arc::new(EnvSecretStore::new(prefix.clone())),
        SecretBackend::File { path } => Arc::new(FileSecretStore::new(base_dir.join(path))),
    }
}

async fn kube_client(context: Option<String>) -> Result<Client> {
    let Some(context) = context else {
        return Client::try_default()
            .await
            .context("Failed to create Kubernetes client");
    };
    let options = KubeConfigOptions {
        context: Some(context.clone()),
        ..Default::default()
    };
    let config = Config::from_kubeconfig(&options)
        .await
        .with_context(|| format!("Failed to load kubeconfig context '{}'", context))?;
    Client::try_from(config).context("Failed to create Kubernetes client")
}

fn docker_backend() -> Result<DockerBackend> {
    let backend = DockerBackend::new().context("Failed to connect to Docker")?;
    let username = std::env::var("DEPLOYIT_REGISTRY_USERNAME").ok();
    let password = std::env::var("DEPLOYIT_REGISTRY_PASSWORD").ok();
    Ok(match (username, password) {
        (Some(username), Some(password)) => backend.with_credentials(username, password),
        _ => backend,
    })
}

fn uses(plan: &DeploymentPlan, kinds: &[ResourceKind]) -> bool {
    plan.iter().any(|decl| kinds.contains(&decl.kind()))
}

/// Register a provisioner for every kind the plan uses. Docker and the
/// cluster are only contacted when some resource needs them.
async fn build_engine(
    settings: &Settings,
    base_dir: &Path,
    plan: &DeploymentPlan,
    concurrency: usize,
    kube_context: Option<String>,
) -> Result<ApplyEngine> {
    let mut engine = ApplyEngine::new(secret_store(settings, base_dir))
        .with_options(EngineOptions { concurrency });

    let helm = Arc::new(
        HelmCli::new(settings.helm.clone())
            .with_kube_context(kube_context.clone())
            .with_timeout(settings.helm_timeout.clone()),
    );
    engine = engine
        .register(Arc::new(ChartProvisioner::new(helm.clone(), base_dir)))
        .register(Arc::new(DatabaseProvisioner::new(helm, base_dir)));

    if uses(plan, &[ResourceKind::ImageBuild]) {
        let builder = Arc::new(ImageBuilder::new(Arc::new(docker_backend()?)));
        engine = engine.register(Arc::new(
            ImageBuildProvisioner::new(builder, base_dir).with_registry(settings.registry.clone()),
        ));
    }

    if uses(plan, &[ResourceKind::Namespace, ResourceKind::ScheduledJob]) {
        let client = kube_client(kube_context).await?;
        engine = engine
            .register(Arc::new(NamespaceProvisioner::new(client.clone())))
            .register(Arc::new(ScheduledJobProvisioner::new(client)));
    }

    Ok(engine)
}

fn print_event(event: &ApplyEvent) {
    match event {
        ApplyEvent::ResourceStarted { resource } => println!("▶ {}", resource),
        ApplyEvent::ResourceFinished { resource, outcome } => {
            let marker = match outcome {
                ResourceOutcome::Applied => "✓",
                ResourceOutcome::SkippedUnchanged => "=",
                ResourceOutcome::Failed { .. } => "✗",
                ResourceOutcome::Blocked { .. } => "⊘",
                ResourceOutcome::Cancelled => "○",
            };
            println!("{} {} {}", marker, resource, outcome);
        }
    }
}

/// Returns whether every resource converged and the state was saved.
pub async fn run(
    target: &Target,
    concurrency: Option<usize>,
    kube_context: Option<String>,
) -> Result<bool> {
    let loaded = target.load()?;
    let plan = loaded.plan()?;
    let settings = &loaded.config.settings;
    let concurrency = concurrency.unwrap_or(settings.concurrency).max(1);

    let (tx, mut rx) = mpsc::channel(64);
    let engine = build_engine(settings, &loaded.base_dir, &plan, concurrency, kube_context)
        .await?
        .with_events(tx);

    let json = target.json;
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if !json {
                print_event(&event);
            }
        }
    });

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing in-flight resources");
            on_signal.cancel();
        }
    });

    info!(
        project = %loaded.context.project,
        stack = %loaded.context.stack,
        resources = plan.len(),
        concurrency,
        "Applying stack"
    );
    let store = loaded.state_store();
    let report = engine
        .run(&loaded.context, &plan, &store, cancel)
        .await
        .with_context(|| format!("Failed to apply stack '{}'", loaded.context.stack))?;

    drop(engine);
    printer.await.context("Event printer task failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("\n{}", report);
        if let Some(reason) = &report.aborted {
            println!("Run aborted: {}", reason);
        }
        if let Some(error) = &report.store_error {
            println!(
                "State was NOT saved to {}: {}",
                store.path().display(),
                error
            );
        }
    }

    Ok(report.is_success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use deployit_core::ResourceDeclaration;
    use deployit_engine::resolve;

    #[test]
    fn test_uses_kind() {
        let plan = resolve(vec![
            ResourceDeclaration::new("postgres", ResourceKind::Database),
            ResourceDeclaration::new("api", ResourceKind::Chart),
        ])
        .unwrap();
        assert!(uses(&plan, &[ResourceKind::Chart]));
        assert!(!uses(&plan, &[ResourceKind::ImageBuild]));
        assert!(!uses(&plan, &[ResourceKind::Namespace, ResourceKind::ScheduledJob]));
    }

    #[test]
    fn test_file_secrets_resolve_against_config_dir() {
        let settings = Settings {
            secrets: SecretBackend::File {
                path: "secrets.json".into(),
            },
            ..Default::default()
        };
        let store = secret_store(&settings, Path::new("/srv/catfacts"));
        assert_eq!(store.name(), "file");
    }
}
