//! Background persistence off the tick path.
//!
//! The tick loop submits a snapshot after every tick and moves on. A single
//! worker task writes the most recent submission; if several arrive while a
//! write is in progress, only the newest is written. A failed write is
//! logged and the next submission retries naturally.

use resonance_types::PersistedState;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::file_store::JsonFileStore;

/// Counters reported when the writer shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Successful writes.
    pub writes: u64,
    /// Failed writes.
    pub failures: u64,
}

/// Handle to the background writer task.
#[derive(Debug)]
pub struct BackgroundWriter {
    tx: watch::Sender<Option<PersistedState>>,
    handle: JoinHandle<WriterStats>,
}

impl BackgroundWriter {
    /// Spawn the writer task on the current tokio runtime.
    pub fn spawn(store: JsonFileStore) -> Self {
        let (tx, rx) = watch::channel(None);
        let handle = tokio::spawn(write_latest(store, rx));
        Self { tx, handle }
    }

    /// Queue `state` for writing, replacing any submission not yet written.
    pub fn submit(&self, state: PersistedState) {
        self.tx.send_replace(Some(state));
    }

    /// Flush the pending submission, stop the worker, and return its counters.
    pub async fn shutdown(self) -> WriterStats {
        let Self { tx, handle } = self;
        drop(tx);
        match handle.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Persistence writer task failed");
                WriterStats::default()
            }
        }
    }
}

async fn write_latest(
    store: JsonFileStore,
    mut rx: watch::Receiver<Option<PersistedState>>,
) -> WriterStats {
    let mut stats = WriterStats::default();

    // An unseen value is still delivered after the sender drops.
    while rx.changed().await.is_ok() {
        let Some(state) = rx.borrow_and_update().clone() else {
            continue;
        };
        match store.save(&state).await {
            Ok(()) => stats.writes = stats.writes.saturating_add(1),
            Err(e) => {
                stats.failures = stats.failures.saturating_add(1);
                warn!(path = %store.path().display(), error = %e, "Failed to persist aggregate state");
            }
        }
    }

    debug!(writes = stats.writes, failures = stats.failures, "Persistence writer stopped");
    stats
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use resonance_types::EventType;

    use super::*;

    #[tokio::test]
    async fn shutdown_flushes_latest_submission() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        let writer = BackgroundWriter::spawn(store.clone());

        let mut state = PersistedState::default();
        for _ in 0..4 {
            state.statistics.record_detected(EventType::HarmonicResonance, 3);
            writer.submit(state.clone());
        }
        let stats = writer.shutdown().await;

        assert!(stats.writes >= 1);
        assert_eq!(stats.failures, 0);
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.statistics.events_detected, 4);
    }

    #[tokio::test]
    async fn shutdown_without_submissions_writes_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        let stats = BackgroundWriter::spawn(store.clone()).shutdown().await;

        assert_eq!(stats, WriterStats::default());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn failed_write_is_counted_not_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        // A directory at the target path makes the rename fail.
        let target = dir.path().join("occupied");
        tokio::fs::create_dir_all(target.join("child")).await.unwrap();

        let writer = BackgroundWriter::spawn(JsonFileStore::new(&target));
        writer.submit(PersistedState::default());
        let stats = writer.shutdown().await;

        assert_eq!(stats.writes, 0);
        assert_eq!(stats.failures, 1);
    }
}
