use crate::error::Result;
use crate::registry::{RegistryError, ServiceRegistry};
use std::collections::BTreeSet;
use thiserror::Error;

/// A dependency cycle discovered during plan resolution. `members` lists the
/// services of one offending cycle in walk order.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("dependency cycle detected: {}", render_cycle(.members))]
pub struct CycleError {
    pub members: Vec<String>,
}

fn render_cycle(members: &[String]) -> String {
    let mut rendered = members.join(" -> ");
    if let Some(first) = members.first() {
        rendered.push_str(" -> ");
        rendered.push_str(first);
    }
    rendered
}

/// Immutable topological startup order over the registry arena. Entries are
/// indices into `ServiceRegistry::all()`; each service appears after every
/// service it depends on.
#[derive(Debug, Clone)]
pub struct StartupPlan {
    order: Vec<usize>,
    dependencies: Vec<Vec<usize>>,
}

impl StartupPlan {
    /// Runs Kahn's algorithm over the dependency edges. Services whose
    /// remaining in-degree reaches zero in the same wave are emitted in
    /// registration order, so the result is deterministic for a given
    /// registry. Any cycle, including a self-loop, fails resolution.
    pub fn resolve(registry: &ServiceRegistry) -> Result<Self> {
        let specs = registry.all();
        let count = specs.len();

        let mut dependencies: Vec<Vec<usize>> = Vec::with_capacity(count);
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (index, spec) in specs.iter().enumerate() {
            let mut resolved = BTreeSet::new();
            for name in &spec.depends_on {
                let dep_index =
                    registry
                        .index_of(name)
                        .ok_or_else(|| RegistryError::UnknownDependency {
                            service: spec.name.clone(),
                            dependency: name.clone(),
                        })?;
                if dep_index == index {
                    return Err(CycleError {
                        members: vec![spec.name.clone()],
                    }
                    .into());
                }
                resolved.insert(dep_index);
            }
            for &dep_index in &resolved {
                dependents[dep_index].push(index);
            }
            dependencies.push(resolved.into_iter().collect());
        }

        let mut remaining_degree: Vec<usize> =
            dependencies.iter().map(|deps| deps.len()).collect();
        let mut ready: BTreeSet<usize> = remaining_degree
            .iter()
            .enumerate()
            .filter(|(_, &degree)| degree == 0)
            .map(|(index, _)| index)
            .collect();

        let mut order = Vec::with_capacity(count);
        while let Some(index) = ready.pop_first() {
            order.push(index);
            for &dependent in &dependents[index] {
                remaining_degree[dependent] -= 1;
                if remaining_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < count {
            let members = walk_cycle(registry, &dependencies, &remaining_degree);
            return Err(CycleError { members }.into());
        }

        Ok(Self {
            order,
            dependencies,
        })
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn dependencies_of(&self, index: usize) -> &[usize] {
        &self.dependencies[index]
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Walks the unresolved remainder of the graph until a node repeats, then
/// trims the prefix so only the cycle itself is reported. Always follows the
/// lowest-ordinal unresolved edge, keeping the reported cycle stable.
fn walk_cycle(
    registry: &ServiceRegistry,
    dependencies: &[Vec<usize>],
    remaining_degree: &[usize],
) -> Vec<String> {
    let unresolved: BTreeSet<usize> = remaining_degree
        .iter()
        .enumerate()
        .filter(|(_, &degree)| degree > 0)
        .map(|(index, _)| index)
        .collect();

    let Some(&start) = unresolved.iter().next() else {
        return Vec::new();
    };

    let mut path: Vec<usize> = Vec::new();
    let mut current = start;
    loop {
        if let Some(position) = path.iter().position(|&seen| seen == current) {
            return path[position..]
                .iter()
                .map(|&index| registry.all()[index].name.clone())
                .collect();
        }
        path.push(current);
        let next = dependencies[current]
            .iter()
            .find(|dep| unresolved.contains(dep));
        match next {
            Some(&dep) => current = dep,
            // Unreachable for a well-formed remainder: every unresolved node
            // keeps at least one unresolved dependency.
            None => {
                return path
                    .iter()
                    .map(|&index| registry.all()[index].name.clone())
                    .collect()
            }
        }
    }
}
