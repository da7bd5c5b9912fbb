use crate::orchestrator::state::{
    HealthStatus, LaunchStateMachine, ServiceSeed, StackState, TransitionError,
};
use crate::registry::ServiceRegistry;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Shared view of per-service health for one run.
///
/// Writers funnel every transition through the state machine; dependents
/// observe changes through per-service watch channels instead of polling.
#[derive(Clone)]
pub struct StatusBoard {
    machine: Arc<RwLock<LaunchStateMachine>>,
    publishers: Arc<BTreeMap<String, watch::Sender<HealthStatus>>>,
}

impl StatusBoard {
    pub fn new(registry: &ServiceRegistry) -> Self {
        let mut publishers = BTreeMap::new();
        let seeds = registry
            .all()
            .iter()
            .enumerate()
            .map(|(ordinal, spec)| {
                let (sender, _) = watch::channel(HealthStatus::Unknown);
                publishers.insert(spec.name.clone(), sender);
                ServiceSeed {
                    name: spec.name.clone(),
                    ordinal,
                }
            })
            .collect::<Vec<_>>();

        Self {
            machine: Arc::new(RwLock::new(LaunchStateMachine::new(seeds))),
            publishers: Arc::new(publishers),
        }
    }

    /// Watch channel carrying `service`'s health. Receivers created before the
    /// first transition observe every terminal state exactly once.
    pub fn subscribe(&self, service: &str) -> Option<watch::Receiver<HealthStatus>> {
        self.publishers
            .get(service)
            .map(|sender| sender.subscribe())
    }

    pub async fn service_state(&self, service: &str) -> Option<HealthStatus> {
        let guard = self.machine.read().await;
        guard.service_state(service)
    }

    pub async fn set_service_state(
        &self,
        service: &str,
        next: HealthStatus,
        reason: &str,
    ) -> Result<HealthStatus, TransitionError> {
        let mut guard = self.machine.write().await;
        let previous = guard.service_state(service);
        let result = guard.set_service_state(service, next);
        let transition = match (previous, result.as_ref()) {
            (Some(from), Ok(&to)) if from != to => Some((from, to)),
            _ => None,
        };
        drop(guard);

        if let Some((from, to)) = transition {
            tracing::info!(
                unit = service,
                state_from = from.as_str(),
                state_to = to.as_str(),
                reason = reason,
                "service state transition"
            );
            if let Some(sender) = self.publishers.get(service) {
                sender.send_replace(to);
            }
        }

        result
    }

    /// Marks the run truncated and logs every service left short of a
    /// terminal state.
    pub async fn mark_cancelled(&self) -> Vec<(String, HealthStatus)> {
        let mut guard = self.machine.write().await;
        let unresolved = guard.mark_cancelled();
        drop(guard);

        for (service, state) in &unresolved {
            tracing::info!(
                unit = service.as_str(),
                state = state.as_str(),
                reason = "run_cancelled",
                "service unresolved at cancellation"
            );
        }

        unresolved
    }

    pub async fn stack_state(&self) -> StackState {
        let guard = self.machine.read().await;
        guard.stack_state()
    }

    pub async fn service_states(&self) -> Vec<(String, HealthStatus)> {
        let guard = self.machine.read().await;
        guard.service_states()
    }
}
