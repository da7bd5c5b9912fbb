use crate::config::GreenlightConfig;
use crate::config::StackManifest;
use crate::error::{Context, Result};
use crate::orchestrator::{OrchestrationReport, Orchestrator};
use crate::plan::StartupPlan;
use crate::registry::ServiceRegistry;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Top-level application: loads the manifest, resolves the startup plan and
/// drives one orchestration run with signal-aware shutdown.
pub struct GreenlightApp {
    orchestrator: Orchestrator,
    drain_timeout: Duration,
    shutdown: CancellationToken,
}

impl GreenlightApp {
    pub fn initialise(config: GreenlightConfig) -> Result<Self> {
        let manifest_path = config.manifest.path;
        let manifest = StackManifest::from_path(&manifest_path)
            .with_context(|| format!("failed to load stack manifest from {manifest_path}"))?;

        tracing::info!(
            stack = %manifest.app.stack_name,
            manifest = %manifest_path,
            services = manifest.services.len(),
            "stack manifest loaded"
        );

        let drain_timeout = manifest.app.drain_timeout;
        let registry = ServiceRegistry::from_specs(manifest.services)?;
        let plan = StartupPlan::resolve(&registry)?;
        let orchestrator = Orchestrator::new(registry, plan, manifest.app)?;

        Ok(Self {
            orchestrator,
            drain_timeout,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs the orchestration to completion, cancelling it on Ctrl+C and
    /// draining within `app.drain_timeout` plus a short hard-stop window.
    pub async fn run(self) -> Result<OrchestrationReport> {
        let run = self.orchestrator.run(self.shutdown.clone());
        tokio::pin!(run);

        let report = tokio::select! {
            report = &mut run => report?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                self.shutdown.cancel();

                let drain_timeout = self.drain_timeout;
                let hard_stop = Duration::from_secs(5);

                match timeout(drain_timeout, &mut run).await {
                    Ok(report) => report?,
                    Err(_) => {
                        tracing::error!(
                            timeout_secs = drain_timeout.as_secs_f64(),
                            "graceful shutdown exceeded app.drain_timeout; forcing exit after hard stop"
                        );
                        match timeout(hard_stop, &mut run).await {
                            Ok(report) => report?,
                            Err(_) => {
                                return Err(crate::err!(
                                    "graceful shutdown timed out after {:?}",
                                    drain_timeout
                                ))
                            }
                        }
                    }
                }
            }
        };

        Ok(report)
    }
}
