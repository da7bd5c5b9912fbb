use crate::config::manifest::AppSettings;
use crate::error::Result;
use crate::launch::{Launcher, ProcessLauncher};
use crate::metrics::metrics;
use crate::orchestrator::board::StatusBoard;
use crate::orchestrator::report::{OrchestrationReport, ServiceReport};
use crate::orchestrator::state::HealthStatus;
use crate::plan::StartupPlan;
use crate::probe::{ProbeOutcome, Prober, StandardProber};
use crate::registry::{ServiceRegistry, ServiceSpec};
use crate::retry::ProbeRetryPolicy;
use crate::stack_event;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Sleeps for a duration but aborts early if the shutdown token fires.
/// Returns `true` if shutdown occurred during the wait.
pub async fn sleep_with_shutdown(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = sleep(duration) => false,
    }
}

fn clamp_millis(elapsed: Duration) -> u64 {
    std::cmp::min(elapsed.as_millis(), u128::from(u64::MAX)) as u64
}

/// Drives one startup run: every service gets its own task, gated on its
/// dependencies' watch channels, so siblings launch concurrently while the
/// dependency order from the plan is preserved.
pub struct Orchestrator {
    registry: Arc<ServiceRegistry>,
    plan: StartupPlan,
    app: AppSettings,
    prober: Arc<dyn Prober>,
    launcher: Arc<dyn Launcher>,
}

impl Orchestrator {
    pub fn new(registry: ServiceRegistry, plan: StartupPlan, app: AppSettings) -> Result<Self> {
        Ok(Self {
            registry: Arc::new(registry),
            plan,
            app,
            prober: Arc::new(StandardProber::new()?),
            launcher: Arc::new(ProcessLauncher),
        })
    }

    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = prober;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn plan(&self) -> &StartupPlan {
        &self.plan
    }

    /// Runs the stack to a terminal state and reports every service.
    ///
    /// Cancelling `shutdown` stops new work immediately; services already
    /// terminal keep their state and everything else is reported `UNKNOWN`
    /// with reason `cancelled`.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<OrchestrationReport> {
        let counters = metrics();
        for spec in self.registry.all() {
            counters.register_launch_target(&spec.name);
        }

        let board = StatusBoard::new(&self.registry);
        let limiter = self
            .app
            .max_concurrent_starts
            .map(|limit| Arc::new(Semaphore::new(limit as usize)));
        let overall_start = Instant::now();

        tracing::info!(
            stack = %self.app.stack_name,
            services = self.registry.len(),
            "startup orchestration begun"
        );

        let mut tasks: JoinSet<Result<ServiceReport>> = JoinSet::new();
        for &index in self.plan.order() {
            let spec = self.registry.all()[index].clone();
            let dependencies = self
                .plan
                .dependencies_of(index)
                .iter()
                .map(|&dep| self.registry.all()[dep].name.clone())
                .collect();
            let policy = ProbeRetryPolicy::for_service(&self.app, &spec);
            let probe_timeout = spec.probe_timeout.unwrap_or(self.app.probe_timeout);

            let task = LaunchTask {
                stack: self.app.stack_name.clone(),
                spec,
                dependencies,
                board: board.clone(),
                prober: Arc::clone(&self.prober),
                launcher: Arc::clone(&self.launcher),
                policy,
                probe_timeout,
                limiter: limiter.clone(),
                shutdown: shutdown.clone(),
            };
            tasks.spawn(task.run());
        }

        let mut reports = Vec::with_capacity(self.plan.len());
        while let Some(joined) = tasks.join_next().await {
            reports.push(joined??);
        }

        if shutdown.is_cancelled() {
            board.mark_cancelled().await;
        }

        reports.sort_by_key(|report| {
            self.registry
                .index_of(&report.service)
                .unwrap_or(usize::MAX)
        });

        let state = board.stack_state().await;
        let duration_ms = clamp_millis(overall_start.elapsed());

        tracing::info!(
            stack = %self.app.stack_name,
            state = state.as_str(),
            duration_ms,
            "startup orchestration finished"
        );

        Ok(OrchestrationReport {
            stack: self.app.stack_name.clone(),
            state,
            duration_ms,
            services: reports,
        })
    }
}

struct LaunchTask {
    stack: String,
    spec: ServiceSpec,
    dependencies: Vec<String>,
    board: StatusBoard,
    prober: Arc<dyn Prober>,
    launcher: Arc<dyn Launcher>,
    policy: ProbeRetryPolicy,
    probe_timeout: Duration,
    limiter: Option<Arc<Semaphore>>,
    shutdown: CancellationToken,
}

impl LaunchTask {
    async fn run(self) -> Result<ServiceReport> {
        let overall_start = Instant::now();

        for dependency in &self.dependencies {
            let mut receiver = self.board.subscribe(dependency).ok_or_else(|| {
                crate::err!(
                    "service `{}` depends on unregistered `{dependency}`",
                    self.spec.name
                )
            })?;

            loop {
                let observed = *receiver.borrow_and_update();
                match observed {
                    HealthStatus::Ready => break,
                    HealthStatus::Failed => {
                        return self.dependency_failed(dependency, overall_start).await;
                    }
                    HealthStatus::Unknown | HealthStatus::Pending => {
                        tokio::select! {
                            _ = self.shutdown.cancelled() => {
                                return self.cancelled(0, overall_start).await;
                            }
                            changed = receiver.changed() => {
                                changed.map_err(|_| {
                                    crate::err!("status publisher for `{dependency}` dropped")
                                })?;
                            }
                        }
                    }
                }
            }
        }

        let _permit = match &self.limiter {
            Some(limiter) => {
                let limiter = Arc::clone(limiter);
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        return self.cancelled(0, overall_start).await;
                    }
                    permit = limiter.acquire_owned() => Some(permit?),
                }
            }
            None => None,
        };

        let counters = metrics();
        self.board
            .set_service_state(&self.spec.name, HealthStatus::Pending, "startup_begun")
            .await?;
        counters.inc_starts_inflight();
        let outcome = self.launch_and_probe(overall_start).await;
        counters.dec_starts_inflight();
        outcome
    }

    async fn launch_and_probe(&self, overall_start: Instant) -> Result<ServiceReport> {
        let counters = metrics();

        tokio::select! {
            _ = self.shutdown.cancelled() => {
                return self.cancelled(0, overall_start).await;
            }
            launched = self.launcher.launch(&self.spec) => {
                if let Err(error) = launched {
                    let reason = error.to_string();
                    let duration_ms = clamp_millis(overall_start.elapsed());
                    self.board
                        .set_service_state(&self.spec.name, HealthStatus::Failed, "start_action_failed")
                        .await?;
                    tracing::error!(
                        unit = %self.spec.name,
                        error = %error,
                        state_from = "pending",
                        state_to = "failed",
                        duration_ms,
                        "service start action failed"
                    );
                    counters.record_launch_failure(&self.spec.name, 0, overall_start.elapsed());
                    return Ok(ServiceReport {
                        service: self.spec.name.clone(),
                        status: HealthStatus::Failed,
                        attempts: 0,
                        duration_ms,
                        reason: Some(reason),
                    });
                }
            }
        }

        let mut attempts: u32 = 0;
        let mut success = false;
        let mut last_reason: Option<String> = None;
        let mut attempt_window_start = Instant::now();

        while attempts < self.policy.max_attempts() {
            attempts += 1;

            let probe_future = self.prober.probe(&self.spec);
            let outcome = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return self.cancelled(attempts, overall_start).await;
                }
                probed = timeout(self.probe_timeout, probe_future) => match probed {
                    Ok(outcome) => outcome,
                    Err(_) => ProbeOutcome::unready(format!(
                        "probe timed out after {:?}",
                        self.probe_timeout
                    )),
                },
            };

            match outcome {
                ProbeOutcome::Ready => {
                    counters.record_probe_success(self.spec.probe.kind(), &self.spec.name);
                    success = true;
                    break;
                }
                ProbeOutcome::Unready { reason } => {
                    counters.record_probe_failure(
                        self.spec.probe.kind(),
                        &self.spec.name,
                        Some(reason.as_str()),
                    );
                    stack_event!(
                        debug,
                        "greenlight::orchestrator",
                        "probe_unready",
                        unit = self.spec.name.as_str(),
                        stack = self.stack.as_str(),
                        attempt = attempts,
                        reason = reason
                    );
                    last_reason = Some(reason);
                }
            }

            let elapsed = attempt_window_start.elapsed();
            if let Some(delay) = self.policy.next_delay(attempts, elapsed) {
                if !delay.is_zero() && sleep_with_shutdown(delay, &self.shutdown).await {
                    return self.cancelled(attempts, overall_start).await;
                }
                attempt_window_start = Instant::now();
            } else {
                break;
            }
        }

        let elapsed = overall_start.elapsed();
        let duration_ms = clamp_millis(elapsed);

        if success {
            self.board
                .set_service_state(&self.spec.name, HealthStatus::Ready, "probe_succeeded")
                .await?;
            tracing::info!(
                unit = %self.spec.name,
                state_from = "pending",
                state_to = "ready",
                attempts,
                duration_ms,
                "service became ready"
            );
            counters.record_launch_ready(&self.spec.name, attempts, elapsed);
            Ok(ServiceReport {
                service: self.spec.name.clone(),
                status: HealthStatus::Ready,
                attempts,
                duration_ms,
                reason: None,
            })
        } else {
            let reason = last_reason.unwrap_or_else(|| "probe never reported ready".to_string());
            self.board
                .set_service_state(&self.spec.name, HealthStatus::Failed, "probe_attempts_exhausted")
                .await?;
            tracing::error!(
                unit = %self.spec.name,
                attempts,
                reason = %reason,
                state_from = "pending",
                state_to = "failed",
                duration_ms,
                "service failed to become ready"
            );
            counters.record_launch_failure(&self.spec.name, attempts, elapsed);
            Ok(ServiceReport {
                service: self.spec.name.clone(),
                status: HealthStatus::Failed,
                attempts,
                duration_ms,
                reason: Some(reason),
            })
        }
    }

    async fn dependency_failed(
        &self,
        dependency: &str,
        overall_start: Instant,
    ) -> Result<ServiceReport> {
        let counters = metrics();
        let reason = format!("dependency `{dependency}` failed");
        self.board
            .set_service_state(&self.spec.name, HealthStatus::Failed, "dependency_failed")
            .await?;
        stack_event!(
            warn,
            "greenlight::orchestrator",
            "dependency_skip",
            unit = self.spec.name.as_str(),
            stack = self.stack.as_str(),
            dependency = dependency
        );
        counters.record_dependency_skip();
        counters.record_launch_failure(&self.spec.name, 0, overall_start.elapsed());
        Ok(ServiceReport {
            service: self.spec.name.clone(),
            status: HealthStatus::Failed,
            attempts: 0,
            duration_ms: clamp_millis(overall_start.elapsed()),
            reason: Some(reason),
        })
    }

    async fn cancelled(&self, attempts: u32, overall_start: Instant) -> Result<ServiceReport> {
        let counters = metrics();
        counters.record_cancelled_service();
        counters.record_launch_abandoned(&self.spec.name, attempts, overall_start.elapsed());
        stack_event!(
            info,
            "greenlight::orchestrator",
            "launch_abandoned",
            unit = self.spec.name.as_str(),
            stack = self.stack.as_str(),
            attempts = attempts
        );
        Ok(ServiceReport {
            service: self.spec.name.clone(),
            status: HealthStatus::Unknown,
            attempts,
            duration_ms: clamp_millis(overall_start.elapsed()),
            reason: Some("cancelled".to_string()),
        })
    }
}
