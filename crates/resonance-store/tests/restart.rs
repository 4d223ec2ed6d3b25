//! Restart behaviour: aggregate state written by one orchestrator is
//! restored into a fresh one through the file store.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use resonance_core::{ManualClock, Orchestrator, OrchestratorConfig};
use resonance_store::{BackgroundWriter, JsonFileStore};
use resonance_types::{EventType, MetricMap};

fn orchestrator(at: DateTime<Utc>) -> Orchestrator {
    let config = OrchestratorConfig {
        seed: Some(9),
        ..OrchestratorConfig::default()
    };
    Orchestrator::new(config, Arc::new(ManualClock::new(at)))
}

fn t0() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(400)
}

#[tokio::test]
async fn restored_orchestrator_resumes_statistics() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = JsonFileStore::new(dir.path().join("state.json"));

    let first = orchestrator(t0());
    for (name, energy) in [("ada", 25.0), ("bo", 30.0), ("cy", 20.0)] {
        first.update_agent_metrics(name, MetricMap::new().with("energy", energy));
    }
    first.tick();

    let mut record = first.persisted_state();
    record.statistics.record_detected(EventType::EnergyCrisis, 3);
    assert_eq!(record.global_state.online_count, 3);
    store.save(&record).await.unwrap();

    let second = orchestrator(t0());
    second.restore(store.load_or_default().await);

    let status = second.status();
    assert_eq!(status.statistics, record.statistics);
    assert!((status.global_state.collective_energy - 25.0).abs() < 1e-9);
    assert!(status.active_events.is_empty());
}

#[tokio::test]
async fn writer_persists_what_the_orchestrator_reports() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = JsonFileStore::new(dir.path().join("nested/state.json"));
    let writer = BackgroundWriter::spawn(store.clone());

    let orch = orchestrator(t0());
    orch.update_agent_metrics("ada", MetricMap::new().with("energy", 90.0));
    for _ in 0..3 {
        orch.tick();
        writer.submit(orch.persisted_state());
    }
    let stats = writer.shutdown().await;
    assert_eq!(stats.failures, 0);

    let loaded = store.load().await.unwrap().unwrap();
    assert_eq!(loaded, orch.persisted_state());
}

#[tokio::test]
async fn corrupt_state_starts_fresh() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    tokio::fs::write(&path, "not json at all").await.unwrap();

    let orch = orchestrator(t0());
    orch.restore(JsonFileStore::new(&path).load_or_default().await);

    let status = orch.status();
    assert_eq!(status.statistics.events_detected, 0);
    assert_eq!(status.tick_count, 0);
}
