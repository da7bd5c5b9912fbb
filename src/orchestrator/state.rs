use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Pending,
    Ready,
    Failed,
}

impl HealthStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, HealthStatus::Ready | HealthStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Unknown => "UNKNOWN",
            HealthStatus::Pending => "PENDING",
            HealthStatus::Ready => "READY",
            HealthStatus::Failed => "FAILED",
        }
    }
}

impl serde::Serialize for HealthStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Aggregate state of one orchestration run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackState {
    Launching,
    Ready,
    Failed,
    Cancelled,
}

impl StackState {
    pub fn as_str(self) -> &'static str {
        match self {
            StackState::Launching => "LAUNCHING",
            StackState::Ready => "READY",
            StackState::Failed => "FAILED",
            StackState::Cancelled => "CANCELLED",
        }
    }
}

impl serde::Serialize for StackState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("service `{service}` is not tracked by this run")]
    ServiceUnknown { service: String },
    #[error("service `{service}` cannot move from {} to {}", from.as_str(), to.as_str())]
    InvalidTransition {
        service: String,
        from: HealthStatus,
        to: HealthStatus,
    },
}

pub struct ServiceSeed {
    pub name: String,
    pub ordinal: usize,
}

struct ServiceEntry {
    state: HealthStatus,
    ordinal: usize,
}

/// Tracks per-service health through a run and validates every transition.
/// Ready and Failed are terminal; cancellation never rewrites a state, it
/// only marks the run truncated.
pub struct LaunchStateMachine {
    services: BTreeMap<String, ServiceEntry>,
    cancelled: bool,
}

impl LaunchStateMachine {
    pub fn new(services: impl IntoIterator<Item = ServiceSeed>) -> Self {
        let mut entries = BTreeMap::new();
        for seed in services {
            entries.insert(
                seed.name,
                ServiceEntry {
                    state: HealthStatus::Unknown,
                    ordinal: seed.ordinal,
                },
            );
        }

        Self {
            services: entries,
            cancelled: false,
        }
    }

    pub fn service_state(&self, service: &str) -> Option<HealthStatus> {
        self.services.get(service).map(|entry| entry.state)
    }

    pub fn set_service_state(
        &mut self,
        service: &str,
        next: HealthStatus,
    ) -> Result<HealthStatus, TransitionError> {
        let name = service.to_string();
        let entry = self
            .services
            .get_mut(service)
            .ok_or_else(|| TransitionError::ServiceUnknown {
                service: name.clone(),
            })?;

        if !Self::is_valid_transition(entry.state, next) {
            return Err(TransitionError::InvalidTransition {
                service: name,
                from: entry.state,
                to: next,
            });
        }

        entry.state = next;
        Ok(entry.state)
    }

    fn is_valid_transition(current: HealthStatus, next: HealthStatus) -> bool {
        match current {
            HealthStatus::Unknown => matches!(
                next,
                HealthStatus::Unknown | HealthStatus::Pending | HealthStatus::Failed
            ),
            HealthStatus::Pending => matches!(
                next,
                HealthStatus::Pending | HealthStatus::Ready | HealthStatus::Failed
            ),
            HealthStatus::Ready => matches!(next, HealthStatus::Ready),
            HealthStatus::Failed => matches!(next, HealthStatus::Failed),
        }
    }

    /// Marks the run truncated and returns every service still short of a
    /// terminal state, in ordinal order, for the caller to log and report.
    pub fn mark_cancelled(&mut self) -> Vec<(String, HealthStatus)> {
        self.cancelled = true;
        let mut unresolved: Vec<(&String, &ServiceEntry)> = self
            .services
            .iter()
            .filter(|(_, entry)| !entry.state.is_terminal())
            .collect();
        unresolved.sort_by_key(|(_, entry)| entry.ordinal);
        unresolved
            .into_iter()
            .map(|(name, entry)| (name.clone(), entry.state))
            .collect()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn stack_state(&self) -> StackState {
        if self.services.is_empty() {
            return StackState::Ready;
        }

        let any_unresolved = self
            .services
            .values()
            .any(|entry| !entry.state.is_terminal());

        if self.cancelled && any_unresolved {
            return StackState::Cancelled;
        }

        if self
            .services
            .values()
            .any(|entry| entry.state == HealthStatus::Failed)
        {
            return StackState::Failed;
        }

        if any_unresolved {
            StackState::Launching
        } else {
            StackState::Ready
        }
    }

    pub fn service_states(&self) -> Vec<(String, HealthStatus)> {
        self.services
            .iter()
            .map(|(name, entry)| (name.clone(), entry.state))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(names: &[&str]) -> LaunchStateMachine {
        LaunchStateMachine::new(names.iter().enumerate().map(|(ordinal, name)| ServiceSeed {
            name: name.to_string(),
            ordinal,
        }))
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        let mut machine = machine(&["db"]);
        machine
            .set_service_state("db", HealthStatus::Pending)
            .expect("unknown to pending is allowed");
        machine
            .set_service_state("db", HealthStatus::Ready)
            .expect("pending to ready is allowed");
        assert_eq!(
            machine.set_service_state("db", HealthStatus::Pending),
            Err(TransitionError::InvalidTransition {
                service: "db".to_string(),
                from: HealthStatus::Ready,
                to: HealthStatus::Pending,
            })
        );
    }

    #[test]
    fn fail_fast_skips_pending() {
        let mut machine = machine(&["app"]);
        machine
            .set_service_state("app", HealthStatus::Failed)
            .expect("unknown to failed is allowed");
        assert_eq!(machine.service_state("app"), Some(HealthStatus::Failed));
    }

    #[test]
    fn stack_state_tracks_the_run() {
        let mut machine = machine(&["db", "app"]);
        assert_eq!(machine.stack_state(), StackState::Launching);
        machine
            .set_service_state("db", HealthStatus::Ready)
            .expect("transition");
        assert_eq!(machine.stack_state(), StackState::Launching);
        machine
            .set_service_state("app", HealthStatus::Ready)
            .expect("transition");
        assert_eq!(machine.stack_state(), StackState::Ready);
    }

    #[test]
    fn any_failure_fails_the_stack() {
        let mut machine = machine(&["db", "app"]);
        machine
            .set_service_state("db", HealthStatus::Ready)
            .expect("transition");
        machine
            .set_service_state("app", HealthStatus::Failed)
            .expect("transition");
        assert_eq!(machine.stack_state(), StackState::Failed);
    }

    #[test]
    fn cancellation_reports_unresolved_services_in_ordinal_order() {
        let mut machine = machine(&["proxy", "db", "app"]);
        machine
            .set_service_state("db", HealthStatus::Ready)
            .expect("transition");
        machine
            .set_service_state("app", HealthStatus::Pending)
            .expect("transition");
        let unresolved = machine.mark_cancelled();
        assert_eq!(
            unresolved,
            vec![
                ("proxy".to_string(), HealthStatus::Unknown),
                ("app".to_string(), HealthStatus::Pending),
            ]
        );
        assert_eq!(machine.stack_state(), StackState::Cancelled);
    }

    #[test]
    fn empty_machine_is_ready() {
        let machine = machine(&[]);
        assert_eq!(machine.stack_state(), StackState::Ready);
    }
}
