use crate::error::Result;
use crate::orchestrator::state::{HealthStatus, StackState};
use serde::Serialize;
use std::fmt::Write as _;

/// Final outcome for one service in a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceReport {
    pub service: String,
    pub status: HealthStatus,
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Summary handed back by [`Orchestrator::run`]: the aggregate stack state
/// plus one entry per registered service, in registration order.
///
/// [`Orchestrator::run`]: crate::orchestrator::Orchestrator::run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestrationReport {
    pub stack: String,
    pub state: StackState,
    pub duration_ms: u64,
    pub services: Vec<ServiceReport>,
}

impl OrchestrationReport {
    pub fn is_ready(&self) -> bool {
        self.state == StackState::Ready
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Plain-text table with computed column widths, one row per service,
    /// followed by a stack summary line.
    pub fn render_table(&self) -> String {
        const HEADERS: [&str; 5] = ["SERVICE", "STATUS", "ATTEMPTS", "DURATION_MS", "REASON"];

        let rows: Vec<[String; 5]> = self
            .services
            .iter()
            .map(|entry| {
                [
                    entry.service.clone(),
                    entry.status.as_str().to_string(),
                    entry.attempts.to_string(),
                    entry.duration_ms.to_string(),
                    entry.reason.clone().unwrap_or_else(|| "-".to_string()),
                ]
            })
            .collect();

        let mut widths = [0usize; 5];
        for (index, header) in HEADERS.iter().enumerate() {
            widths[index] = header.len();
        }
        for row in &rows {
            for (index, cell) in row.iter().enumerate() {
                widths[index] = widths[index].max(cell.len());
            }
        }

        let mut output = String::new();
        let mut header_line = String::new();
        for (index, header) in HEADERS.iter().enumerate() {
            if index > 0 {
                header_line.push_str("  ");
            }
            let _ = write!(header_line, "{:width$}", header, width = widths[index]);
        }
        let _ = writeln!(output, "{}", header_line.trim_end());

        let separator: String = widths
            .iter()
            .enumerate()
            .map(|(index, &width)| {
                if index > 0 {
                    format!("  {}", "-".repeat(width))
                } else {
                    "-".repeat(width)
                }
            })
            .collect();
        let _ = writeln!(output, "{separator}");

        for row in &rows {
            let mut row_line = String::new();
            for (index, cell) in row.iter().enumerate() {
                if index > 0 {
                    row_line.push_str("  ");
                }
                let _ = write!(row_line, "{:width$}", cell, width = widths[index]);
            }
            let _ = writeln!(output, "{}", row_line.trim_end());
        }

        let _ = writeln!(
            output,
            "\nstack `{}` {} after {} ms",
            self.stack,
            self.state.as_str(),
            self.duration_ms
        );

        output
    }
}
