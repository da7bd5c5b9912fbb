use crate::error::Result;
use crate::registry::ServiceSpec;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Opaque command that brings a service up. The command is expected to
/// return once the service has been handed off (daemonised, container
/// started, unit enqueued); readiness is established by the probe, not by
/// the start action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartAction {
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl StartAction {
    pub fn command(argv: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }
}

/// Runs a service's start action exactly once. A launch error is terminal
/// for that service; the probe loop never begins.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, spec: &ServiceSpec) -> Result<()>;
}

/// Launcher that executes start commands as child processes and requires a
/// zero exit status.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, spec: &ServiceSpec) -> Result<()> {
        let Some(action) = spec.start.as_ref() else {
            return Ok(());
        };

        let Some((program, args)) = action.argv.split_first() else {
            return Err(crate::err!(
                "start command for `{}` is empty",
                spec.name
            ));
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(&action.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = action.working_dir.as_ref() {
            command.current_dir(dir);
        }

        let status = command.status().await.map_err(|err| {
            crate::err!(
                "failed to spawn start command `{program}` for `{}`: {err}",
                spec.name
            )
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(crate::err!(
                "start command `{program}` for `{}` exited with {status}",
                spec.name
            ))
        }
    }
}
