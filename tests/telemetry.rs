use greenlight::metrics::{metrics, LaunchState};
use greenlight::orchestrator::{HealthStatus, StatusBoard};
use greenlight::probe::ProbeSpec;
use greenlight::registry::{ServiceRegistry, ServiceSpec};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::subscriber::with_default;
use tracing_subscriber::fmt::MakeWriter;

struct BufferWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for BufferWriter {
    type Writer = BufferGuard;

    fn make_writer(&'a self) -> Self::Writer {
        BufferGuard {
            buffer: self.buffer.clone(),
        }
    }
}

struct BufferGuard {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl std::io::Write for BufferGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.buffer.lock().expect("log buffer lock");
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn capture_logs<F>(action: F) -> String
where
    F: FnOnce(),
{
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let writer = BufferWriter {
        buffer: buffer.clone(),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .without_time()
        .with_target(true)
        .finish();

    with_default(subscriber, action);

    let contents = buffer.lock().expect("log buffer lock");
    String::from_utf8(contents.clone()).expect("utf8 logs")
}

fn single_service_registry(name: &str) -> ServiceRegistry {
    let mut registry = ServiceRegistry::new();
    registry
        .register(ServiceSpec {
            name: name.to_string(),
            start: None,
            probe: ProbeSpec::None,
            probe_timeout: None,
            depends_on: Vec::new(),
            retry: None,
        })
        .expect("unique service name");
    registry
}

#[test]
fn board_transitions_log_from_and_to_states() {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let output = capture_logs(|| {
        runtime.block_on(async {
            let board = StatusBoard::new(&single_service_registry("log-db"));
            board
                .set_service_state("log-db", HealthStatus::Pending, "startup_begun")
                .await
                .expect("transition");
            board
                .set_service_state("log-db", HealthStatus::Ready, "probe_succeeded")
                .await
                .expect("transition");
        });
    });

    assert!(output.contains("log-db"), "{output}");
    assert!(output.contains("state_from"), "{output}");
    assert!(output.contains("state_to"), "{output}");
    assert!(output.contains("UNKNOWN"), "{output}");
    assert!(output.contains("PENDING"), "{output}");
    assert!(output.contains("READY"), "{output}");
    assert!(output.contains("probe_succeeded"), "{output}");
}

#[test]
fn cancellation_sweep_logs_unresolved_services() {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let output = capture_logs(|| {
        runtime.block_on(async {
            let board = StatusBoard::new(&single_service_registry("log-cache"));
            board.mark_cancelled().await;
        });
    });

    assert!(output.contains("log-cache"), "{output}");
    assert!(output.contains("run_cancelled"), "{output}");
}

#[test]
fn launch_counters_surface_in_the_snapshot() {
    let collector = metrics();
    collector.register_launch_target("counter-db");
    collector.record_launch_ready("counter-db", 3, Duration::from_millis(1_500));
    collector.record_probe_success("command", "counter-db");
    collector.record_probe_failure("command", "counter-db", Some("refused"));
    collector.record_probe_failure("command", "counter-db", Some("refused"));

    let snapshot = collector.snapshot();

    let launch = snapshot
        .launches
        .iter()
        .find(|entry| entry.service == "counter-db")
        .expect("launch entry present");
    assert_eq!(launch.state, LaunchState::Ready);
    assert_eq!(launch.attempts, 3);
    assert_eq!(launch.duration_ms, Some(1_500));

    let probe = snapshot
        .probe_outcomes
        .iter()
        .find(|entry| entry.service == "counter-db")
        .expect("probe entry present");
    assert_eq!(probe.kind, "command");
    assert_eq!(probe.success, 1);
    assert_eq!(probe.failure, 2);
    assert_eq!(
        probe.failures_by_reason,
        vec![("refused".to_string(), 2)]
    );
}
