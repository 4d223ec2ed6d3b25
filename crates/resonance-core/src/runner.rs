//! Periodic tick driver.
//!
//! [`run_detection_loop`] drives [`Orchestrator::tick`] on a fixed interval
//! until the shutdown signal flips. Ticks never overlap: a tick that overruns
//! its slot delays the next one rather than bursting to catch up. Every
//! report is handed to a [`TickCallback`], which is where hosts hook
//! persistence and display updates.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::orchestrator::{Orchestrator, TickReport};

/// Shortest accepted tick interval.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Callback invoked around the tick loop.
pub trait TickCallback: Send {
    /// Called after each tick completes.
    fn on_tick(&mut self, report: &TickReport, orchestrator: &Orchestrator);

    /// Called once after the loop stops.
    fn on_shutdown(&mut self, _orchestrator: &Orchestrator) {}
}

/// A no-op tick callback for testing.
pub struct NoOpCallback;

impl TickCallback for NoOpCallback {
    fn on_tick(&mut self, _report: &TickReport, _orchestrator: &Orchestrator) {}
}

/// Result of a detection run.
#[derive(Debug)]
pub struct RunSummary {
    /// Ticks executed.
    pub total_ticks: u64,
    /// The last tick's report, if any tick ran.
    pub last_report: Option<TickReport>,
}

/// Run ticks every `interval` until `shutdown` becomes `true` or its sender
/// is dropped.
pub async fn run_detection_loop(
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    callback: &mut dyn TickCallback,
) -> RunSummary {
    let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut summary = RunSummary {
        total_ticks: 0,
        last_report: None,
    };

    info!(interval_ms = interval.as_millis(), "Detection loop starting");

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {
                let report = orchestrator.tick();
                callback.on_tick(&report, &orchestrator);
                summary.total_ticks = summary.total_ticks.saturating_add(1);
                summary.last_report = Some(report);
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    callback.on_shutdown(&orchestrator);
    info!(total_ticks = summary.total_ticks, "Detection loop stopped");
    summary
}
