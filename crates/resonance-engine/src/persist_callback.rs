//! Tick callback that persists the aggregate record.

use resonance_core::{Orchestrator, TickCallback, TickReport};
use resonance_store::BackgroundWriter;
use tracing::debug;

/// Submits the aggregate record to the background writer after every tick.
pub struct PersistCallback<'a> {
    writer: &'a BackgroundWriter,
}

impl<'a> PersistCallback<'a> {
    /// Create a callback that feeds `writer`.
    pub const fn new(writer: &'a BackgroundWriter) -> Self {
        Self { writer }
    }
}

impl TickCallback for PersistCallback<'_> {
    fn on_tick(&mut self, report: &TickReport, orchestrator: &Orchestrator) {
        self.writer.submit(orchestrator.persisted_state());
        debug!(tick = report.tick, "Aggregate record submitted");
    }

    fn on_shutdown(&mut self, orchestrator: &Orchestrator) {
        self.writer.submit(orchestrator.persisted_state());
        debug!("Final aggregate record submitted");
    }
}
