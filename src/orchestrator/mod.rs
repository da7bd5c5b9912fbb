//! Dependency-gated startup orchestration.
//!
//! [`Orchestrator`] owns one run: it spawns a task per service, blocks each
//! task on its dependencies via the [`StatusBoard`] watch channels, launches
//! the start action once, then drives the readiness probe with retry and
//! backoff until the service lands in a terminal state.

pub mod board;
pub mod report;
pub mod runner;
pub mod state;

pub use board::StatusBoard;
pub use report::{OrchestrationReport, ServiceReport};
pub use runner::{sleep_with_shutdown, Orchestrator};
pub use state::{HealthStatus, LaunchStateMachine, StackState, TransitionError};
