//! Effect propagation: the feedback path from events back into agents.
//!
//! When an event is created, every affected agent receives a per-agent
//! intensity and the event type's fixed table of named deltas, scaled by
//! that intensity. The scaled deltas are written into the registry's copy of
//! the agent's telemetry, a [`ParticipationEntry`] is appended to the
//! agent's bounded history, and a [`SinkDelivery`] carrying the raw delta
//! map is queued for the agent's [`EffectSink`] when one is registered.
//! Deliveries run outside the tick's locks.
//!
//! Agents without a sink simply do not receive the callback. Nothing here
//! returns an error.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use resonance_types::{AgentId, Event, EventType, MetricMap, ParticipationEntry, keys};
use tracing::debug;

use crate::config::OrchestratorConfig;
use crate::registry::MetricsRegistry;

/// Role multiplier for the epicenter.
pub const EPICENTER_MULTIPLIER: f64 = 1.5;

/// Role multiplier for a participant that is not the epicenter.
pub const PARTICIPANT_MULTIPLIER: f64 = 1.2;

/// Role multiplier for an agent that is only affected.
pub const AFFECTED_MULTIPLIER: f64 = 1.0;

/// The update surface an external agent subsystem exposes for effects.
pub trait EffectSink: Send + Sync {
    /// Receive the event's raw delta map and this agent's intensity.
    fn apply_effect_delta(&self, agent_id: &AgentId, deltas: &BTreeMap<String, f64>, intensity: f64);
}

/// Registered sinks keyed by agent.
pub type SinkMap = BTreeMap<AgentId, Arc<dyn EffectSink>>;

// ---------------------------------------------------------------------------
// Effect kinds
// ---------------------------------------------------------------------------

/// A named delta and the metric it moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EffectKind {
    /// Moves `creativity`, `[0, 1]`.
    CreativityBoost,
    /// Moves `performance`, `[0, 1]`.
    EfficiencyBoost,
    /// Moves `energy`, `[0, 100]`.
    EnergyRegen,
    /// Moves `conflicts`, `[0, inf)`.
    ConflictReduction,
}

impl EffectKind {
    /// The delta's name in [`Event::applied_effects`] and sink callbacks.
    pub const fn name(self) -> &'static str {
        match self {
            Self::CreativityBoost => "creativityBoost",
            Self::EfficiencyBoost => "efficiencyBoost",
            Self::EnergyRegen => "energyRegen",
            Self::ConflictReduction => "conflictReduction",
        }
    }

    /// The metric key the delta is applied to.
    pub const fn metric(self) -> &'static str {
        match self {
            Self::CreativityBoost => keys::CREATIVITY,
            Self::EfficiencyBoost => keys::PERFORMANCE,
            Self::EnergyRegen => keys::ENERGY,
            Self::ConflictReduction => keys::CONFLICTS,
        }
    }

    const fn default_value(self) -> f64 {
        match self {
            Self::CreativityBoost => keys::CREATIVITY_DEFAULT,
            Self::EfficiencyBoost => keys::PERFORMANCE_DEFAULT,
            Self::EnergyRegen => keys::ENERGY_DEFAULT,
            Self::ConflictReduction => 0.0,
        }
    }

    const fn bounds(self) -> (f64, f64) {
        match self {
            Self::CreativityBoost | Self::EfficiencyBoost => (0.0, 1.0),
            Self::EnergyRegen => (0.0, 100.0),
            Self::ConflictReduction => (0.0, f64::INFINITY),
        }
    }
}

/// The fixed delta table for one event type.
pub const fn effect_table(event_type: EventType) -> &'static [(EffectKind, f64)] {
    match event_type {
        EventType::CreativeConvergence => &[
            (EffectKind::CreativityBoost, 0.15),
            (EffectKind::EnergyRegen, 5.0),
        ],
        EventType::ResearchSurge => &[
            (EffectKind::EfficiencyBoost, 0.10),
            (EffectKind::EnergyRegen, -5.0),
        ],
        EventType::HarmonicResonance => &[
            (EffectKind::ConflictReduction, -1.0),
            (EffectKind::EfficiencyBoost, 0.05),
        ],
        EventType::EnergyCrisis => &[
            (EffectKind::EnergyRegen, -10.0),
            (EffectKind::CreativityBoost, -0.05),
        ],
        EventType::CognitiveStorm => &[
            (EffectKind::CreativityBoost, 0.10),
            (EffectKind::ConflictReduction, 1.0),
        ],
        EventType::GreatAlignment => &[
            (EffectKind::EnergyRegen, 10.0),
            (EffectKind::EfficiencyBoost, 0.10),
            (EffectKind::CreativityBoost, 0.10),
        ],
    }
}

/// The delta table as a name-keyed map.
pub fn applied_effects(event_type: EventType) -> BTreeMap<String, f64> {
    effect_table(event_type)
        .iter()
        .map(|(kind, delta)| (kind.name().to_owned(), *delta))
        .collect()
}

// ---------------------------------------------------------------------------
// Intensities
// ---------------------------------------------------------------------------

const fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Role multiplier of one agent within an event.
pub fn role_multiplier(event: &Event, agent_id: &AgentId) -> f64 {
    if event.epicenter.as_ref() == Some(agent_id) {
        EPICENTER_MULTIPLIER
    } else if event.participants.contains(agent_id) {
        PARTICIPANT_MULTIPLIER
    } else {
        AFFECTED_MULTIPLIER
    }
}

/// Per-agent intensity for every affected agent, clamped to `[0, 1]`.
pub fn compute_intensities(
    event: &Event,
    config: &OrchestratorConfig,
) -> BTreeMap<AgentId, f64> {
    let base = event.intensity.base_intensity();
    event
        .affected
        .iter()
        .map(|agent_id| {
            let raw = base * role_multiplier(event, agent_id) * config.sensitivity_of(agent_id);
            (agent_id.clone(), clamp_unit(raw))
        })
        .collect()
}

/// Apply one scaled delta to a metric map, clamped to the metric's range.
pub fn apply_delta(metrics: &mut MetricMap, kind: EffectKind, delta: f64, intensity: f64) {
    let current = metrics.number_or(kind.metric(), kind.default_value());
    let (low, high) = kind.bounds();
    let next = (current + delta * intensity).clamp(low, high);
    metrics.set(kind.metric(), next);
}

// ---------------------------------------------------------------------------
// Propagation
// ---------------------------------------------------------------------------

/// A sink callback computed during a tick, delivered once the tick's locks
/// are released so a sink may call back into the orchestrator.
pub struct SinkDelivery {
    sink: Arc<dyn EffectSink>,
    agent_id: AgentId,
    deltas: BTreeMap<String, f64>,
    intensity: f64,
}

impl SinkDelivery {
    /// The receiving agent.
    pub const fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// The agent's intensity for the event.
    pub const fn intensity(&self) -> f64 {
        self.intensity
    }

    /// Invoke the sink.
    pub fn deliver(self) {
        self.sink
            .apply_effect_delta(&self.agent_id, &self.deltas, self.intensity);
    }
}

impl std::fmt::Debug for SinkDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkDelivery")
            .field("agent_id", &self.agent_id)
            .field("deltas", &self.deltas)
            .field("intensity", &self.intensity)
            .finish_non_exhaustive()
    }
}

/// What one propagation pass touched, plus the sink calls it owes.
#[derive(Debug, Default)]
pub struct Propagation {
    /// Agents whose registry telemetry was updated.
    pub agents_updated: usize,
    /// Pending sink callbacks, one per affected agent with a sink.
    pub deliveries: Vec<SinkDelivery>,
}

/// Compute intensities for a freshly created event and write its effects
/// into the registry.
///
/// Sink callbacks are not invoked here. They are returned in
/// [`Propagation::deliveries`] for the caller to deliver after it has
/// released any locks a sink might need.
pub fn propagate(
    event: &mut Event,
    config: &OrchestratorConfig,
    registry: &MetricsRegistry,
    sinks: &SinkMap,
    now: DateTime<Utc>,
) -> Propagation {
    event.intensity_per_agent = compute_intensities(event, config);
    event.applied_effects = applied_effects(event.event_type);

    let table = effect_table(event.event_type);
    let mut result = Propagation::default();

    for (agent_id, &intensity) in &event.intensity_per_agent {
        let updated = registry.update_metrics(agent_id, |metrics| {
            for &(kind, delta) in table {
                apply_delta(metrics, kind, delta, intensity);
            }
        });
        if updated {
            result.agents_updated = result.agents_updated.saturating_add(1);
        }

        registry.record_participation(
            agent_id,
            ParticipationEntry {
                event_id: event.id,
                event_type: event.event_type,
                intensity,
                participant: event.participants.contains(agent_id),
                at: now,
            },
            config.participation_history_capacity,
        );

        if let Some(sink) = sinks.get(agent_id) {
            result.deliveries.push(SinkDelivery {
                sink: Arc::clone(sink),
                agent_id: agent_id.clone(),
                deltas: event.applied_effects.clone(),
                intensity,
            });
        }
    }

    debug!(
        event_id = %event.id,
        event_type = %event.event_type,
        agents_updated = result.agents_updated,
        sinks_pending = result.deliveries.len(),
        "Effects propagated"
    );

    result
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use chrono::TimeDelta;
    use resonance_types::{EventId, EventPhase, GlobalState, Intensity};

    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn of(map: &BTreeMap<AgentId, f64>, id: &str) -> f64 {
        map.get(&AgentId::from(id)).copied().unwrap_or(f64::NAN)
    }

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(1)
    }

    fn event(event_type: EventType, intensity: Intensity) -> Event {
        let affected: BTreeSet<AgentId> = ["a", "b", "c"].into_iter().map(AgentId::from).collect();
        Event {
            id: EventId::new(),
            pattern_id: "test".to_owned(),
            name: "Test".to_owned(),
            event_type,
            intensity,
            phase: EventPhase::Gestation,
            started_at: t0(),
            ended_at: None,
            planned_duration_secs: 60,
            participants: BTreeSet::from([AgentId::from("a"), AgentId::from("b")]),
            affected,
            epicenter: Some(AgentId::from("a")),
            intensity_per_agent: BTreeMap::new(),
            applied_effects: BTreeMap::new(),
            impact_metrics: BTreeMap::new(),
            origin_context: GlobalState::default(),
            trigger_probability: 1.0,
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(AgentId, f64)>>,
    }

    impl EffectSink for RecordingSink {
        fn apply_effect_delta(&self, agent_id: &AgentId, _deltas: &BTreeMap<String, f64>, intensity: f64) {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((agent_id.clone(), intensity));
            }
        }
    }

    #[test]
    fn role_multipliers_shape_intensity() {
        let ev = event(EventType::CognitiveStorm, Intensity::Moderate);
        let intensities = compute_intensities(&ev, &OrchestratorConfig::default());
        assert!(close(of(&intensities, "a"), 0.4 * 1.5));
        assert!(close(of(&intensities, "b"), 0.4 * 1.2));
        assert!(close(of(&intensities, "c"), 0.4));
    }

    #[test]
    fn intensities_are_clamped() {
        let ev = event(EventType::CognitiveStorm, Intensity::Cataclysmic);
        let mut config = OrchestratorConfig::default();
        config.sensitivity.insert(AgentId::from("c"), 3.0);
        config.sensitivity.insert(AgentId::from("b"), -1.0);
        let intensities = compute_intensities(&ev, &config);
        for value in intensities.values() {
            assert!((0.0..=1.0).contains(value));
        }
        assert!(close(of(&intensities, "a"), 1.0));
        assert!(close(of(&intensities, "b"), 0.0));
    }

    #[test]
    fn deltas_respect_metric_ranges() {
        let mut metrics = MetricMap::new().with(keys::ENERGY, 98.0);
        apply_delta(&mut metrics, EffectKind::EnergyRegen, 10.0, 1.0);
        assert!(close(metrics.number_or(keys::ENERGY, 0.0), 100.0));

        apply_delta(&mut metrics, EffectKind::ConflictReduction, -1.0, 1.0);
        assert!(close(metrics.number_or(keys::CONFLICTS, -1.0), 0.0));

        // Absent creativity starts from its default.
        apply_delta(&mut metrics, EffectKind::CreativityBoost, 0.15, 0.5);
        assert!(close(metrics.number_or(keys::CREATIVITY, 0.0), 0.575));
    }

    #[test]
    fn propagate_updates_registry_history_and_sinks() {
        let registry = MetricsRegistry::new();
        for id in ["a", "b", "c"] {
            registry.ingest(AgentId::from(id), MetricMap::new().with(keys::ENERGY, 50.0), t0());
        }
        let sink = Arc::new(RecordingSink::default());
        let mut sinks = SinkMap::new();
        sinks.insert(AgentId::from("b"), sink.clone() as Arc<dyn EffectSink>);

        let mut ev = event(EventType::GreatAlignment, Intensity::Strong);
        let result = propagate(&mut ev, &OrchestratorConfig::default(), &registry, &sinks, t0());

        assert_eq!(result.agents_updated, 3);
        assert_eq!(result.deliveries.len(), 1);
        assert_eq!(ev.applied_effects.len(), 3);
        assert_eq!(ev.applied_effects.get("energyRegen").copied(), Some(10.0));

        // Affected-only agent: intensity 0.6, energy 50 + 10 * 0.6.
        let c = registry.metrics_of(&AgentId::from("c")).unwrap_or_default();
        assert!(close(c.number_or(keys::ENERGY, 0.0), 56.0));

        let history = registry.participation_history(&AgentId::from("a"));
        assert_eq!(history.len(), 1);
        assert!(history.iter().all(|entry| entry.participant));
        assert!(
            registry
                .participation_history(&AgentId::from("c"))
                .iter()
                .all(|entry| !entry.participant)
        );

        // Nothing reaches the sink until the deliveries are handed over.
        assert!(sink.calls.lock().map(|c| c.is_empty()).unwrap_or(false));
        for delivery in result.deliveries {
            assert_eq!(delivery.agent_id(), &AgentId::from("b"));
            delivery.deliver();
        }

        let calls = sink.calls.lock().map(|c| c.clone()).unwrap_or_default();
        assert_eq!(calls.len(), 1);
        assert!(calls.first().is_some_and(|(_, intensity)| close(*intensity, 0.6 * 1.2)));
    }

    #[test]
    fn every_event_type_has_effects() {
        for event_type in EventType::ALL {
            assert!(!effect_table(event_type).is_empty());
        }
    }
}
