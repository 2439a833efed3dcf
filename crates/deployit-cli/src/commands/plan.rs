//! `deployit plan` - the apply order, without touching anything.

use anyhow::{Context, Result};
use deployit_core::state::{AppliedState, StateStore};
use deployit_engine::DeploymentPlan;

use super::Target;

/// How the persisted state relates to a planned resource.
fn recorded(state: &AppliedState, name: &str, kind: deployit_core::ResourceKind) -> String {
    match state.get(name) {
        None => "new".to_string(),
        Some(record) if record.kind != kind => {
            format!("recorded as {}, kind changed", record.kind)
        }
        Some(record) => format!("recorded {}", record.short_hash()),
    }
}

fn render(plan: &DeploymentPlan, state: &AppliedState) -> Vec<String> {
    plan.iter()
        .enumerate()
        .map(|(i, decl)| {
            let deps: Vec<&str> = plan.dependencies_of(decl.name()).collect();
            let deps = if deps.is_empty() {
                String::new()
            } else {
                format!(" after {}", deps.join(", "))
            };
            format!(
                "{:>2}. {} ({}){} [{}]",
                i + 1,
                decl.name(),
                decl.kind(),
                deps,
                recorded(state, decl.name(), decl.kind())
            )
        })
        .collect()
}

pub async fn run(target: &Target) -> Result<()> {
    let loaded = target.load()?;
    let plan = loaded.plan()?;
    let store = loaded.state_store();
    let state = store
        .load()
        .await
        .with_context(|| format!("Failed to read state from {}", store.path().display()))?;

    if target.json {
        let resources: Vec<serde_json::Value> = plan
            .iter()
            .map(|decl| {
                serde_json::json!({
                    "name": decl.name(),
                    "kind": decl.kind(),
                    "dependsOn": plan.dependencies_of(decl.name()).collect::<Vec<_>>(),
                    "recorded": state.contains(decl.name()),
                })
            })
            .collect();
        let out = serde_json::json!({
            "stack": loaded.context.stack,
            "resources": resources,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!(
        "Plan for stack '{}' ({} resources):",
        loaded.context.stack,
        plan.len()
    );
    for line in render(&plan, &state) {
        println!("{}", line);
    }
    Ok(())
}
