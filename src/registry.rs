use crate::config::manifest::RetryBudget;
use crate::launch::StartAction;
use crate::probe::ProbeSpec;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Declarative description of one service in the stack.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
    pub name: String,
    pub start: Option<StartAction>,
    pub probe: ProbeSpec,
    pub probe_timeout: Option<Duration>,
    pub depends_on: Vec<String>,
    pub retry: Option<RetryBudget>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("service `{0}` is already registered")]
    DuplicateService(String),
    #[error("service `{0}` is not registered")]
    UnknownService(String),
    #[error("service `{service}` depends on unknown service `{dependency}`")]
    UnknownDependency { service: String, dependency: String },
}

/// Holds the registered service specs in registration order. The position of
/// a spec in the arena is its ordinal; plan resolution breaks ties with it.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    specs: Vec<ServiceSpec>,
    index_by_name: BTreeMap<String, usize>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from an ordered spec collection and validates the
    /// dependency references in one pass.
    pub fn from_specs(
        specs: impl IntoIterator<Item = ServiceSpec>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for spec in specs {
            registry.register(spec)?;
        }
        registry.validate_dependencies()?;
        Ok(registry)
    }

    pub fn register(&mut self, spec: ServiceSpec) -> Result<usize, RegistryError> {
        if self.index_by_name.contains_key(&spec.name) {
            return Err(RegistryError::DuplicateService(spec.name));
        }
        let ordinal = self.specs.len();
        self.index_by_name.insert(spec.name.clone(), ordinal);
        self.specs.push(spec);
        Ok(ordinal)
    }

    pub fn get(&self, name: &str) -> Result<&ServiceSpec, RegistryError> {
        self.index_by_name
            .get(name)
            .map(|&index| &self.specs[index])
            .ok_or_else(|| RegistryError::UnknownService(name.to_string()))
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index_by_name.get(name).copied()
    }

    pub fn all(&self) -> &[ServiceSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Checks that every declared dependency names a registered service.
    /// Callers run this once registration is complete; no start action has
    /// run at that point.
    pub fn validate_dependencies(&self) -> Result<(), RegistryError> {
        for spec in &self.specs {
            for dependency in &spec.depends_on {
                if !self.index_by_name.contains_key(dependency) {
                    return Err(RegistryError::UnknownDependency {
                        service: spec.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
