//! `deployit validate`.

use anyhow::{Context, Result, bail};
use deployit_engine::resolve;

use super::Target;

/// Parse the file and resolve the selected stack, or every stack.
pub fn run(target: &Target) -> Result<()> {
    let config = target.load_config()?;

    let stacks: Vec<String> = match &target.stack {
        Some(stack) => vec![stack.clone()],
        None => config.stack_names().map(str::to_string).collect(),
    };
    if stacks.is_empty() {
        bail!("No stacks declared in {}", target.config.display());
    }

    for stack in &stacks {
        let declarations = config.declarations(stack)?;
        let plan =
            resolve(declarations).with_context(|| format!("Invalid stack '{}'", stack))?;
        println!("✓ stack '{}': {} resources", stack, plan.len());
    }

    println!("Configuration is valid");
    Ok(())
}
