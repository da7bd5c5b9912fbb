use crate::error::Result;
use crate::registry::ServiceSpec;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::net::TcpStream;
use tokio::process::Command;

/// How to decide that a service is healthy. `None` reports ready as soon as
/// the start action has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeSpec {
    Tcp { addr: String },
    Http { url: String, expect_status: u16 },
    Command { argv: Vec<String> },
    None,
}

impl ProbeSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeSpec::Tcp { .. } => "tcp",
            ProbeSpec::Http { .. } => "http",
            ProbeSpec::Command { .. } => "command",
            ProbeSpec::None => "none",
        }
    }
}

/// Result of one probe attempt. An unready attempt is recoverable; the
/// orchestrator decides whether to retry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    Unready { reason: String },
}

impl ProbeOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ProbeOutcome::Ready)
    }

    pub fn unready(reason: impl Into<String>) -> Self {
        ProbeOutcome::Unready {
            reason: reason.into(),
        }
    }
}

/// Executes a single probe attempt for a service. Attempts must be safe to
/// repeat; the caller bounds each attempt with the configured timeout.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, spec: &ServiceSpec) -> ProbeOutcome;
}

/// Prober backed by real connections and processes.
pub struct StandardProber {
    http: reqwest::Client,
}

impl StandardProber {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Prober for StandardProber {
    async fn probe(&self, spec: &ServiceSpec) -> ProbeOutcome {
        match &spec.probe {
            ProbeSpec::None => ProbeOutcome::Ready,
            ProbeSpec::Tcp { addr } => match TcpStream::connect(addr.as_str()).await {
                Ok(_) => ProbeOutcome::Ready,
                Err(err) => ProbeOutcome::unready(format!("tcp connect to `{addr}` failed: {err}")),
            },
            ProbeSpec::Http { url, expect_status } => {
                match self.http.get(url.as_str()).send().await {
                    Ok(response) if response.status().as_u16() == *expect_status => {
                        ProbeOutcome::Ready
                    }
                    Ok(response) => ProbeOutcome::unready(format!(
                        "GET {url} returned status {} (expected {expect_status})",
                        response.status().as_u16()
                    )),
                    Err(err) => ProbeOutcome::unready(format!("GET {url} failed: {err}")),
                }
            }
            ProbeSpec::Command { argv } => run_probe_command(argv).await,
        }
    }
}

async fn run_probe_command(argv: &[String]) -> ProbeOutcome {
    let Some((program, args)) = argv.split_first() else {
        return ProbeOutcome::unready("probe command is empty");
    };

    let spawned = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match spawned {
        Ok(status) if status.success() => ProbeOutcome::Ready,
        Ok(status) => ProbeOutcome::unready(format!(
            "probe command `{program}` exited with {status}"
        )),
        Err(err) => ProbeOutcome::unready(format!("probe command `{program}` failed: {err}")),
    }
}
