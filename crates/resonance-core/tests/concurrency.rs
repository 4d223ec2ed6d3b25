//! Concurrent ingestion while ticks run.
//!
//! Writers on several threads report telemetry in a tight loop while the
//! main thread ticks. Every write must land, the registry must end up with
//! each agent's last write, and the event invariants must hold throughout.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use resonance_core::pattern::builtin_patterns;
use resonance_core::{ManualClock, Orchestrator, OrchestratorConfig, PatternRegistry};
use resonance_types::{AgentId, MetricMap, keys};

const WRITERS: usize = 4;
const AGENTS_PER_WRITER: usize = 3;
const ROUNDS: u32 = 300;

/// Metric that effect propagation never touches, so the last write is
/// observable after ticks have run.
const SEQ: &str = "seq";

fn agent(writer: usize, slot: usize) -> AgentId {
    AgentId::new(format!("writer-{writer}-{slot}"))
}

fn telemetry(round: u32) -> MetricMap {
    MetricMap::new()
        .with(SEQ, f64::from(round))
        .with(keys::ENERGY, f64::from(round % 100))
        .with(keys::CREATIVITY, 0.8)
        .with(keys::PERFORMANCE, 0.9)
        .with(keys::ACTIVITY_LABEL, "research")
        .with(keys::PROCESSING, round % 2 == 0)
}

fn orchestrator() -> Orchestrator {
    let mut patterns = PatternRegistry::empty();
    for mut pattern in builtin_patterns() {
        pattern.base_probability = 1.0;
        patterns.register(pattern).unwrap();
    }
    let config = OrchestratorConfig {
        seed: Some(31),
        ..OrchestratorConfig::default()
    };
    let start = DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(500);
    Orchestrator::with_patterns(config, patterns, Arc::new(ManualClock::new(start)))
}

#[test]
fn ingestion_from_many_threads_during_ticks() {
    let orch = orchestrator();
    let finished = AtomicUsize::new(0);

    let (writes, ticks) = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..WRITERS)
            .map(|writer| {
                let orch = &orch;
                let finished = &finished;
                scope.spawn(move || {
                    let mut writes = 0_usize;
                    for round in 0..ROUNDS {
                        let slot = usize::try_from(round).unwrap() % AGENTS_PER_WRITER;
                        orch.update_agent_metrics(agent(writer, slot), telemetry(round));
                        writes += 1;
                    }
                    finished.fetch_add(1, Ordering::SeqCst);
                    writes
                })
            })
            .collect();

        let mut ticks = 0_u32;
        while finished.load(Ordering::SeqCst) < WRITERS || ticks < 5 {
            orch.tick();
            ticks += 1;
        }
        let writes: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        (writes, ticks)
    });

    assert_eq!(writes, WRITERS * usize::try_from(ROUNDS).unwrap());
    assert!(ticks >= 5);

    // Each agent holds its last reported sequence number.
    for writer in 0..WRITERS {
        for slot in 0..AGENTS_PER_WRITER {
            let last = (0..ROUNDS)
                .filter(|round| usize::try_from(*round).unwrap() % AGENTS_PER_WRITER == slot)
                .max()
                .unwrap();
            let metrics = orch.agent_metrics(&agent(writer, slot)).unwrap();
            assert_eq!(metrics.number(SEQ), Some(f64::from(last)));
        }
    }
    assert_eq!(orch.online_agents().len(), WRITERS * AGENTS_PER_WRITER);

    let report = orch.tick();
    assert_eq!(report.online_count, WRITERS * AGENTS_PER_WRITER);

    for event in orch.active_events().iter().chain(orch.history().iter()) {
        assert!(event.participants.is_subset(&event.affected));
        if let Some(epicenter) = &event.epicenter {
            assert!(event.participants.contains(epicenter));
        }
        for intensity in event.intensity_per_agent.values() {
            assert!((0.0..=1.0).contains(intensity));
        }
    }
    let stats = orch.statistics();
    let by_type: u64 = stats.events_by_type.values().sum();
    assert_eq!(by_type, stats.events_detected);
}
