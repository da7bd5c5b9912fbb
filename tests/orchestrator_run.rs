use async_trait::async_trait;
use greenlight::config::manifest::{AppSettings, RetryBudget};
use greenlight::launch::{Launcher, StartAction};
use greenlight::orchestrator::{HealthStatus, Orchestrator, StackState};
use greenlight::plan::StartupPlan;
use greenlight::probe::{ProbeOutcome, ProbeSpec, Prober};
use greenlight::registry::{ServiceRegistry, ServiceSpec};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

fn spec(name: &str, depends_on: &[&str]) -> ServiceSpec {
    ServiceSpec {
        name: name.to_string(),
        start: Some(StartAction::command(["true"])),
        probe: ProbeSpec::Command {
            argv: vec!["true".to_string()],
        },
        probe_timeout: None,
        depends_on: depends_on.iter().map(|dep| dep.to_string()).collect(),
        retry: None,
    }
}

fn registry(specs: Vec<ServiceSpec>) -> ServiceRegistry {
    ServiceRegistry::from_specs(specs).expect("test specs should register")
}

fn app_settings(max_attempts: u32, base_backoff_ms: u64) -> AppSettings {
    let mut app = AppSettings::default();
    app.stack_name = "test-stack".to_string();
    app.retry_budget = Some(RetryBudget {
        max_attempts: Some(max_attempts),
        max_elapsed: None,
        base_backoff: Some(Duration::from_millis(base_backoff_ms)),
        max_backoff: Some(Duration::from_millis(base_backoff_ms * 4)),
        jitter: None,
    });
    app
}

fn orchestrator(
    registry: ServiceRegistry,
    app: AppSettings,
    prober: Arc<dyn Prober>,
    launcher: Arc<dyn Launcher>,
) -> Orchestrator {
    let plan = StartupPlan::resolve(&registry).expect("test plan should resolve");
    Orchestrator::new(registry, plan, app)
        .expect("orchestrator build")
        .with_prober(prober)
        .with_launcher(launcher)
}

/// Prober double that pops one scripted outcome per attempt and answers
/// `Ready` once a service's script is exhausted.
#[derive(Default)]
struct ScriptedProber {
    scripts: Mutex<BTreeMap<String, VecDeque<ProbeOutcome>>>,
    calls: Mutex<BTreeMap<String, u32>>,
}

impl ScriptedProber {
    fn script(self, service: &str, outcomes: Vec<ProbeOutcome>) -> Self {
        self.scripts
            .lock()
            .expect("scripts lock")
            .insert(service.to_string(), VecDeque::from(outcomes));
        self
    }

    fn calls_for(&self, service: &str) -> u32 {
        self.calls
            .lock()
            .expect("calls lock")
            .get(service)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, spec: &ServiceSpec) -> ProbeOutcome {
        *self
            .calls
            .lock()
            .expect("calls lock")
            .entry(spec.name.clone())
            .or_insert(0) += 1;
        self.scripts
            .lock()
            .expect("scripts lock")
            .get_mut(&spec.name)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(ProbeOutcome::Ready)
    }
}

/// Prober double whose attempts take a fixed wall-clock time before
/// answering `Ready`.
struct SlowProber {
    delay: Duration,
}

#[async_trait]
impl Prober for SlowProber {
    async fn probe(&self, _spec: &ServiceSpec) -> ProbeOutcome {
        sleep(self.delay).await;
        ProbeOutcome::Ready
    }
}

/// Prober double that never resolves; only cancellation or the attempt
/// timeout can unblock the caller.
struct StallingProber;

#[async_trait]
impl Prober for StallingProber {
    async fn probe(&self, _spec: &ServiceSpec) -> ProbeOutcome {
        std::future::pending::<()>().await;
        unreachable!("pending future resolved")
    }
}

/// Launcher double that records invocations and refuses the configured
/// services.
#[derive(Default)]
struct CountingLauncher {
    launches: Mutex<BTreeMap<String, u32>>,
    refuse: BTreeSet<String>,
}

impl CountingLauncher {
    fn refusing(services: &[&str]) -> Self {
        Self {
            launches: Mutex::new(BTreeMap::new()),
            refuse: services.iter().map(|name| name.to_string()).collect(),
        }
    }

    fn launches_for(&self, service: &str) -> u32 {
        self.launches
            .lock()
            .expect("launches lock")
            .get(service)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Launcher for CountingLauncher {
    async fn launch(&self, spec: &ServiceSpec) -> greenlight::error::Result<()> {
        *self
            .launches
            .lock()
            .expect("launches lock")
            .entry(spec.name.clone())
            .or_insert(0) += 1;
        if self.refuse.contains(&spec.name) {
            return Err(format!("start action for `{}` refused", spec.name).into());
        }
        Ok(())
    }
}

#[tokio::test]
async fn chain_starts_in_order_and_every_start_runs_once() {
    let prober = Arc::new(ScriptedProber::default());
    let launcher = Arc::new(CountingLauncher::default());
    let orchestrator = orchestrator(
        registry(vec![
            spec("db", &[]),
            spec("app", &["db"]),
            spec("proxy", &["app"]),
        ]),
        app_settings(3, 1),
        Arc::clone(&prober) as Arc<dyn Prober>,
        Arc::clone(&launcher) as Arc<dyn Launcher>,
    );

    let report = orchestrator
        .run(CancellationToken::new())
        .await
        .expect("run completes");

    assert_eq!(report.state, StackState::Ready);
    let names: Vec<&str> = report
        .services
        .iter()
        .map(|entry| entry.service.as_str())
        .collect();
    assert_eq!(names, vec!["db", "app", "proxy"]);
    for entry in &report.services {
        assert_eq!(entry.status, HealthStatus::Ready);
        assert_eq!(entry.attempts, 1);
        assert_eq!(launcher.launches_for(&entry.service), 1);
    }
}

#[tokio::test]
async fn flaky_dependency_is_retried_and_the_stack_still_comes_up() {
    let prober = Arc::new(
        ScriptedProber::default().script(
            "db",
            vec![ProbeOutcome::unready("connection refused"), ProbeOutcome::Ready],
        ),
    );
    let launcher = Arc::new(CountingLauncher::default());
    let orchestrator = orchestrator(
        registry(vec![
            spec("db", &[]),
            spec("app", &["db"]),
            spec("proxy", &["app"]),
        ]),
        app_settings(5, 1),
        Arc::clone(&prober) as Arc<dyn Prober>,
        launcher,
    );

    let report = orchestrator
        .run(CancellationToken::new())
        .await
        .expect("run completes");

    assert_eq!(report.state, StackState::Ready);
    assert_eq!(report.services[0].service, "db");
    assert_eq!(report.services[0].attempts, 2);
    assert_eq!(report.services[1].attempts, 1);
    assert_eq!(report.services[2].attempts, 1);
    assert_eq!(prober.calls_for("db"), 2);
}

#[tokio::test]
async fn exhausted_probe_budget_marks_the_service_failed() {
    let unready = || ProbeOutcome::unready("still warming up");
    let prober = Arc::new(
        ScriptedProber::default().script("db", (0..10).map(|_| unready()).collect()),
    );
    let launcher = Arc::new(CountingLauncher::default());
    let orchestrator = orchestrator(
        registry(vec![spec("db", &[])]),
        app_settings(3, 1),
        Arc::clone(&prober) as Arc<dyn Prober>,
        launcher,
    );

    let report = orchestrator
        .run(CancellationToken::new())
        .await
        .expect("run completes");

    assert_eq!(report.state, StackState::Failed);
    let db = &report.services[0];
    assert_eq!(db.status, HealthStatus::Failed);
    assert_eq!(db.attempts, 3);
    assert_eq!(db.reason.as_deref(), Some("still warming up"));
    assert_eq!(prober.calls_for("db"), 3, "no probes after exhaustion");
}

#[tokio::test]
async fn failed_dependency_skips_dependents_without_starting_them() {
    let prober = Arc::new(
        ScriptedProber::default().script("db", vec![ProbeOutcome::unready("refused")]),
    );
    let launcher = Arc::new(CountingLauncher::default());
    let orchestrator = orchestrator(
        registry(vec![
            spec("db", &[]),
            spec("app", &["db"]),
            spec("proxy", &["app"]),
        ]),
        app_settings(1, 1),
        prober,
        Arc::clone(&launcher) as Arc<dyn Launcher>,
    );

    let report = orchestrator
        .run(CancellationToken::new())
        .await
        .expect("run completes");

    assert_eq!(report.state, StackState::Failed);
    let app = &report.services[1];
    assert_eq!(app.status, HealthStatus::Failed);
    assert_eq!(app.attempts, 0);
    assert_eq!(app.reason.as_deref(), Some("dependency `db` failed"));
    let proxy = &report.services[2];
    assert_eq!(proxy.status, HealthStatus::Failed);
    assert_eq!(proxy.reason.as_deref(), Some("dependency `app` failed"));
    assert_eq!(launcher.launches_for("app"), 0);
    assert_eq!(launcher.launches_for("proxy"), 0);
}

#[tokio::test]
async fn refused_start_action_is_terminal_without_probing() {
    let prober = Arc::new(ScriptedProber::default());
    let launcher = Arc::new(CountingLauncher::refusing(&["db"]));
    let orchestrator = orchestrator(
        registry(vec![spec("db", &[])]),
        app_settings(5, 1),
        Arc::clone(&prober) as Arc<dyn Prober>,
        launcher,
    );

    let report = orchestrator
        .run(CancellationToken::new())
        .await
        .expect("run completes");

    assert_eq!(report.state, StackState::Failed);
    let db = &report.services[0];
    assert_eq!(db.status, HealthStatus::Failed);
    assert_eq!(db.attempts, 0);
    assert_eq!(db.reason.as_deref(), Some("start action for `db` refused"));
    assert_eq!(prober.calls_for("db"), 0);
}

#[tokio::test]
async fn probe_timeout_counts_as_a_failed_attempt() {
    let mut slow = spec("db", &[]);
    slow.probe_timeout = Some(Duration::from_millis(20));
    let launcher = Arc::new(CountingLauncher::default());
    let orchestrator = orchestrator(
        registry(vec![slow]),
        app_settings(2, 1),
        Arc::new(SlowProber {
            delay: Duration::from_millis(500),
        }),
        launcher,
    );

    let report = orchestrator
        .run(CancellationToken::new())
        .await
        .expect("run completes");

    let db = &report.services[0];
    assert_eq!(db.status, HealthStatus::Failed);
    assert_eq!(db.attempts, 2);
    assert!(
        db.reason
            .as_deref()
            .is_some_and(|reason| reason.contains("timed out")),
        "reason should mention the timeout, got {:?}",
        db.reason
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_abandons_unresolved_services() {
    let launcher = Arc::new(CountingLauncher::default());
    let orchestrator = orchestrator(
        registry(vec![spec("db", &[]), spec("cache", &[])]),
        app_settings(5, 1),
        Arc::new(StallingProber),
        launcher,
    );

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = orchestrator.run(shutdown).await.expect("run completes");

    assert_eq!(report.state, StackState::Cancelled);
    for entry in &report.services {
        assert_eq!(entry.status, HealthStatus::Unknown);
        assert_eq!(entry.reason.as_deref(), Some("cancelled"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_services_probe_concurrently() {
    let delay = Duration::from_millis(250);
    let launcher = Arc::new(CountingLauncher::default());
    let orchestrator = orchestrator(
        registry(vec![spec("db", &[]), spec("cache", &[])]),
        app_settings(1, 1),
        Arc::new(SlowProber { delay }),
        launcher,
    );

    let begun = Instant::now();
    let report = orchestrator
        .run(CancellationToken::new())
        .await
        .expect("run completes");

    assert_eq!(report.state, StackState::Ready);
    assert!(
        begun.elapsed() < delay * 2,
        "independent probes should overlap, took {:?}",
        begun.elapsed()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn start_concurrency_cap_serialises_launches() {
    let delay = Duration::from_millis(100);
    let mut app = app_settings(1, 1);
    app.max_concurrent_starts = Some(1);
    let launcher = Arc::new(CountingLauncher::default());
    let orchestrator = orchestrator(
        registry(vec![spec("db", &[]), spec("cache", &[])]),
        app,
        Arc::new(SlowProber { delay }),
        launcher,
    );

    let begun = Instant::now();
    let report = orchestrator
        .run(CancellationToken::new())
        .await
        .expect("run completes");

    assert_eq!(report.state, StackState::Ready);
    assert!(
        begun.elapsed() >= delay * 2,
        "a cap of one should serialise the probes, took {:?}",
        begun.elapsed()
    );
}
