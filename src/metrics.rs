use crate::telemetry::{runtime_counters, RuntimeCounters};
use std::sync::OnceLock;
use std::time::Duration;

pub use crate::telemetry::{
    LaunchState, LaunchStatusSnapshot, ProbeOutcomeSnapshot, RuntimeCountersSnapshot,
};

/// Collector that wraps the runtime counter APIs with a single entrypoint.
pub struct MetricsCollector {
    counters: &'static RuntimeCounters,
}

impl MetricsCollector {
    fn new() -> Self {
        Self {
            counters: runtime_counters(),
        }
    }

    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<MetricsCollector> = OnceLock::new();
        INSTANCE.get_or_init(Self::new)
    }

    pub fn snapshot(&self) -> crate::telemetry::RuntimeCountersSnapshot {
        self.counters.snapshot()
    }

    pub fn inc_starts_inflight(&self) {
        self.counters.inc_starts_inflight();
    }

    pub fn dec_starts_inflight(&self) {
        self.counters.dec_starts_inflight();
    }

    pub fn record_dependency_skip(&self) {
        self.counters.record_dependency_skip();
    }

    pub fn record_cancelled_service(&self) {
        self.counters.record_cancelled_service();
    }

    pub fn register_launch_target(&self, service: &str) {
        self.counters.register_launch_target(service);
    }

    pub fn record_launch_ready(&self, service: &str, attempts: u32, elapsed: Duration) {
        self.counters.record_launch_ready(service, attempts, elapsed);
    }

    pub fn record_launch_failure(&self, service: &str, attempts: u32, elapsed: Duration) {
        self.counters
            .record_launch_failure(service, attempts, elapsed);
    }

    pub fn record_launch_abandoned(&self, service: &str, attempts: u32, elapsed: Duration) {
        self.counters
            .record_launch_abandoned(service, attempts, elapsed);
    }

    pub fn record_probe_success(&self, kind: &str, service: &str) {
        self.counters.record_probe_success(kind, service);
    }

    pub fn record_probe_failure(&self, kind: &str, service: &str, reason: Option<&str>) {
        self.counters.record_probe_failure(kind, service, reason);
    }
}

/// Returns the shared `MetricsCollector` instance.
pub fn metrics() -> &'static MetricsCollector {
    MetricsCollector::global()
}
