//! Dependency graph resolution.
//!
//! An edge `A -> B` exists when B lists A in `depends_on` or references one
//! of A's outputs. Ordering is Kahn's algorithm with the ready set kept
//! sorted by name, so identical declarations always give the same plan.

use deployit_core::{Error, ResourceDeclaration, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Declarations in dependency order. Every dependency of a resource appears
/// strictly before it.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    order: Vec<ResourceDeclaration>,
    /// Effective (explicit + implicit) dependencies per resource.
    dependencies: BTreeMap<String, BTreeSet<String>>,
}

impl DeploymentPlan {
    pub fn iter(&self) -> impl Iterator<Item = &ResourceDeclaration> {
        self.order.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|d| d.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ResourceDeclaration> {
        self.order.iter().find(|d| d.name() == name)
    }

    /// Direct dependencies of `name`, explicit and implicit.
    pub fn dependencies_of(&self, name: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(name)
            .into_iter()
            .flat_map(|deps| deps.iter().map(|d| d.as_str()))
    }

    /// Every resource that depends on `name`, directly or transitively.
    pub fn dependents_of(&self, name: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![name.to_string()];
        while let Some(current) = frontier.pop() {
            for (candidate, deps) in &self.dependencies {
                if deps.contains(&current) && found.insert(candidate.clone()) {
                    frontier.push(candidate.clone());
                }
            }
        }
        found
    }
}

/// Order `declarations` so every dependency precedes its dependents.
///
/// Fails with [`Error::Cycle`] naming the resources on the cycle; no partial
/// plan is ever returned.
pub fn resolve(declarations: Vec<ResourceDeclaration>) -> Result<DeploymentPlan> {
    let mut by_name: BTreeMap<String, ResourceDeclaration> = BTreeMap::new();
    for decl in declarations {
        let name = decl.name().to_string();
        if by_name.insert(name.clone(), decl).is_some() {
            return Err(Error::DuplicateResource(name));
        }
    }

    let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (name, decl) in &by_name {
        let deps = decl.dependencies();
        for dep in &deps {
            let Some((dep_name, _)) = by_name.get_key_value(dep) else {
                return Err(Error::UnknownDependency {
                    resource: name.clone(),
                    dependency: dep.clone(),
                });
            };
            dependents
                .entry(dep_name.as_str())
                .or_default()
                .insert(name.as_str());
        }
        dependencies.insert(name.clone(), deps);
    }

    let mut in_degree: BTreeMap<&str, usize> = dependencies
        .iter()
        .map(|(name, deps)| (name.as_str(), deps.len()))
        .collect();
    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();

    let mut ordered_names: Vec<String> = Vec::with_capacity(by_name.len());
    while let Some(next) = ready.pop_first() {
        ordered_names.push(next.to_string());
        for dependent in dependents.get(next).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if ordered_names.len() < by_name.len() {
        let placed: BTreeSet<&str> = ordered_names.iter().map(|s| s.as_str()).collect();
        let remaining: BTreeSet<&str> = by_name
            .keys()
            .map(|k| k.as_str())
            .filter(|k| !placed.contains(k))
            .collect();
        return Err(Error::Cycle(cycle_members(remaining, &dependencies)));
    }

    let order = ordered_names
        .into_iter()
        .filter_map(|name| by_name.remove(&name))
        .collect();

    Ok(DeploymentPlan {
        order,
        dependencies,
    })
}

/// Strip resources that merely sit downstream of a cycle: repeatedly drop
/// nodes that nothing else in the set depends on.
fn cycle_members(
    mut remaining: BTreeSet<&str>,
    dependencies: &BTreeMap<String, BTreeSet<String>>,
) -> Vec<String> {
    loop {
        let sinks: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|candidate| {
                !remaining.iter().any(|other| {
                    dependencies
                        .get(*other)
                        .is_some_and(|deps| deps.contains(*candidate))
                })
            })
            .collect();
        if sinks.is_empty() {
            break;
        }
        for sink in sinks {
            remaining.remove(sink);
        }
    }
    remaining.into_iter().map(str::to_string).collect()
}
