pub mod app;
pub mod config;
pub mod error;
pub mod launch;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod plan;
pub mod probe;
pub mod registry;
pub mod retry;
pub mod telemetry;
