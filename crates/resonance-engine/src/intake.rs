//! Telemetry intake from newline-delimited JSON.
//!
//! Each line carries one agent's latest metrics:
//!
//! ```text
//! {"agent_id": "ada", "metrics": {"energy": 72, "processing": true}}
//! ```
//!
//! Stdin is read on a dedicated OS thread so a blocked read never holds up
//! runtime shutdown. Lines are forwarded over a bounded channel to an async
//! task that ingests them into the orchestrator. Malformed lines are logged
//! and skipped.

use std::io::BufRead;
use std::sync::Arc;

use resonance_core::Orchestrator;
use resonance_types::{AgentId, MetricMap};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lines buffered between the reader thread and the ingest task.
const LINE_BUFFER: usize = 256;

/// One telemetry record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TelemetryLine {
    /// The reporting agent.
    pub agent_id: AgentId,
    /// Its full latest metric snapshot.
    #[serde(default)]
    pub metrics: MetricMap,
}

/// Counters for one intake run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntakeStats {
    /// Records ingested.
    pub accepted: u64,
    /// Lines that failed to parse.
    pub rejected: u64,
}

/// Parse one line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<TelemetryLine>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some)
}

/// Start a detached thread that forwards stdin lines until EOF or error.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read telemetry from stdin");
                    break;
                }
            }
        }
        debug!("Stdin reader finished");
    });
    rx
}

/// Ingest lines until the channel closes.
pub async fn ingest_lines(
    mut lines: mpsc::Receiver<String>,
    orchestrator: Arc<Orchestrator>,
) -> IntakeStats {
    let mut stats = IntakeStats::default();
    while let Some(line) = lines.recv().await {
        match parse_line(&line) {
            Ok(Some(record)) => {
                debug!(agent_id = %record.agent_id, metrics = record.metrics.len(), "Telemetry received");
                orchestrator.update_agent_metrics(record.agent_id, record.metrics);
                stats.accepted = stats.accepted.saturating_add(1);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Skipping malformed telemetry line");
                stats.rejected = stats.rejected.saturating_add(1);
            }
        }
    }
    info!(accepted = stats.accepted, rejected = stats.rejected, "Telemetry intake closed");
    stats
}
