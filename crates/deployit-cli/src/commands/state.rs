//! `deployit state` - print persisted records. Records hold hashes and
//! outputs only, so nothing printed here is secret.

use anyhow::{Context, Result};
use deployit_core::state::{AppliedState, StateStore};

use super::Target;

fn render(state: &AppliedState) -> Vec<String> {
    let mut lines = Vec::new();
    for (name, record) in state.iter() {
        lines.push(format!(
            "{} ({}) {} applied {}",
            name,
            record.kind,
            record.short_hash(),
            record.last_applied_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        if let Some(artifact) = &record.artifact {
            lines.push(format!("    image = {}", artifact.image));
        }
        for (key, value) in record.outputs.iter() {
            lines.push(format!("    {} = {}", key, value));
        }
    }
    lines
}

pub async fn run(target: &Target) -> Result<()> {
    let loaded = target.load()?;
    let store = loaded.state_store();
    let state = store
        .load()
        .await
        .with_context(|| format!("Failed to read state from {}", store.path().display()))?;

    if target.json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    if state.is_empty() {
        println!("No resources recorded in {}", store.path().display());
        return Ok(());
    }
    for line in render(&state) {
        println!("{}", line);
    }
    Ok(())
}
