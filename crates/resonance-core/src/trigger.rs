//! Probability engine and trigger.
//!
//! Turns a matched pattern into a probabilistic decision to spawn an
//! [`Event`]. The probability is the pattern's base probability, dampened
//! when collective energy is below the floor or the active-event cap is
//! reached, then scaled by the pattern's own multiplier and clamped.
//!
//! # Low-energy ceiling
//!
//! While collective energy is below the floor the final probability never
//! exceeds `0.1 x base`, even for patterns whose multiplier amplifies.
//!
//! The random draw is injected by the caller so tests can pin it.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rand::Rng;
use resonance_types::{
    AgentId, Event, EventId, EventPhase, GlobalState, Intensity, MetricMap, keys,
};
use tracing::{debug, info};

use crate::config::OrchestratorConfig;
use crate::effects;
use crate::pattern::{ParticipantStrategy, PatternDefinition, ProbabilityModifier};
use crate::registry::RegistrySnapshot;

/// Factor applied by each hard dampener.
pub const DAMPENER: f64 = 0.1;

/// Participants selected beyond the pattern minimum.
const EXTRA_PARTICIPANTS: usize = 2;

/// Collective energy above which the intensity score gains a bonus.
const HIGH_ENERGY: f64 = 80.0;
/// Synchronization above which the intensity score gains a bonus.
const HIGH_SYNC: f64 = 0.8;
/// Online population at which the intensity score gains a bonus.
const CROWD: usize = 5;

/// Dampener thresholds taken from configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerPolicy {
    /// Collective energy below which every probability is dampened.
    pub energy_floor: f64,
    /// Active event count at which every probability is dampened.
    pub max_concurrent_events: usize,
}

impl TriggerPolicy {
    /// Build a policy from orchestrator configuration.
    pub const fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            energy_floor: config.energy_floor,
            max_concurrent_events: config.max_concurrent_events,
        }
    }

    /// Trigger probability for a pattern, clamped to `[0, 1]`.
    pub fn probability(
        &self,
        pattern: &PatternDefinition,
        global: &GlobalState,
        active_events: usize,
    ) -> f64 {
        let base = pattern.base_probability;
        let low_energy = global.collective_energy < self.energy_floor;

        let mut p = base;
        if low_energy {
            p *= DAMPENER;
        }
        if active_events >= self.max_concurrent_events {
            p *= DAMPENER;
        }
        p *= modifier_factor(pattern.probability_modifier, global);
        if low_energy {
            p = p.min(base * DAMPENER);
        }

        if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) }
    }

    /// Draw once for every matched pattern and instantiate the winners.
    ///
    /// Events spawned earlier in the same call count toward the active-event
    /// cap for later patterns.
    pub fn trigger<R: Rng>(
        &self,
        matched: &[&PatternDefinition],
        snapshot: &RegistrySnapshot,
        global: &GlobalState,
        active_events: usize,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> Vec<Event> {
        let mut spawned = Vec::new();
        for pattern in matched {
            let active = active_events.saturating_add(spawned.len());
            let probability = self.probability(pattern, global, active);
            let draw: f64 = rng.random();
            let fired = draw < probability;
            debug!(pattern = %pattern.id, probability, draw, fired, "Trigger draw");
            if fired {
                let event = instantiate(pattern, snapshot, global, probability, now);
                info!(
                    event_id = %event.id,
                    pattern = %pattern.id,
                    intensity = ?event.intensity,
                    participants = event.participants.len(),
                    affected = event.affected.len(),
                    "Event triggered"
                );
                spawned.push(event);
            }
        }
        spawned
    }
}

fn modifier_factor(modifier: ProbabilityModifier, global: &GlobalState) -> f64 {
    match modifier {
        ProbabilityModifier::None => 1.0,
        ProbabilityModifier::ScaleBy(scalar) => scalar.read(global),
        ProbabilityModifier::Amplify(scalar) => 1.0 + scalar.read(global),
        ProbabilityModifier::EnergyDeficit => {
            1.0 + (1.0 - global.collective_energy / 100.0).clamp(0.0, 1.0)
        }
    }
}

// ---------------------------------------------------------------------------
// Participants
// ---------------------------------------------------------------------------

fn ranked<'a>(
    snapshot: &'a RegistrySnapshot,
    key: &str,
    default: f64,
    highest_first: bool,
) -> Vec<&'a AgentId> {
    let mut scored: Vec<(&AgentId, f64)> = snapshot
        .online
        .iter()
        .map(|(id, metrics)| (id, metrics.number_or(key, default)))
        .collect();
    // Stable sort: equal values keep id order.
    if highest_first {
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    } else {
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
    }
    scored.into_iter().map(|(id, _)| id).collect()
}

/// Choose participants among online agents per the pattern's strategy.
///
/// Takes `min_participants + 2` agents, or every online agent if fewer.
pub fn select_participants(
    pattern: &PatternDefinition,
    snapshot: &RegistrySnapshot,
) -> BTreeSet<AgentId> {
    let minimum = usize::try_from(pattern.min_participants).unwrap_or(usize::MAX);
    let target = minimum.saturating_add(EXTRA_PARTICIPANTS);

    let ordered: Vec<&AgentId> = match &pattern.participant_strategy {
        ParticipantStrategy::InOrder => snapshot.online.keys().collect(),
        ParticipantStrategy::HighestMetric { key, default } => {
            ranked(snapshot, key, *default, true)
        }
        ParticipantStrategy::LowestMetric { key, default } => {
            ranked(snapshot, key, *default, false)
        }
        ParticipantStrategy::FlagSet { flag } => {
            let is_flagged = |id: &&AgentId| {
                snapshot
                    .online
                    .get(*id)
                    .and_then(|metrics| metrics.flag(flag))
                    .unwrap_or(false)
            };
            let (flagged, rest): (Vec<&AgentId>, Vec<&AgentId>) =
                snapshot.online.keys().partition(is_flagged);
            let mut chosen: Vec<&AgentId> = flagged.into_iter().take(target).collect();
            let shortfall = minimum.saturating_sub(chosen.len());
            chosen.extend(rest.into_iter().take(shortfall));
            return chosen.into_iter().cloned().collect();
        }
    };

    ordered.into_iter().take(target).cloned().collect()
}

// ---------------------------------------------------------------------------
// Intensity and epicenter
// ---------------------------------------------------------------------------

/// Weighted intensity score for a pattern firing under `global`.
pub fn intensity_score(pattern: &PatternDefinition, global: &GlobalState) -> f64 {
    let mut score = 0.0;
    if global.collective_energy > HIGH_ENERGY {
        score += 0.2;
    }
    if global.synchronization_level > HIGH_SYNC {
        score += 0.2;
    }
    if global.online_agents.len() >= CROWD {
        score += 0.1;
    }
    if let Some(bonus) = pattern.intensity_bonus {
        score += bonus.scalar.read(global) * bonus.weight;
    }
    score
}

fn epicenter_score(metrics: &MetricMap) -> f64 {
    let energy = metrics.number_or(keys::ENERGY, keys::ENERGY_DEFAULT);
    let activity = metrics.number_or(keys::ACTIVITY_LEVEL, keys::ACTIVITY_LEVEL_DEFAULT);
    let creativity = metrics.number_or(keys::CREATIVITY, keys::CREATIVITY_DEFAULT);
    0.3 * energy + 0.4 * activity * 100.0 + 0.3 * creativity * 100.0
}

/// The participant with the highest epicenter score; ties go to the
/// smallest id.
pub fn epicenter(participants: &BTreeSet<AgentId>, snapshot: &RegistrySnapshot) -> Option<AgentId> {
    let mut best: Option<(&AgentId, f64)> = None;
    for id in participants {
        let Some(metrics) = snapshot.online.get(id) else {
            continue;
        };
        let score = epicenter_score(metrics);
        if best.is_none_or(|(_, best_score)| score > best_score) {
            best = Some((id, score));
        }
    }
    best.map(|(id, _)| id.clone())
}

/// Build a new event in [`EventPhase::Gestation`] for a fired pattern.
///
/// Affected agents are every agent online in the snapshot. Per-agent
/// intensities are filled in by effect propagation.
pub fn instantiate(
    pattern: &PatternDefinition,
    snapshot: &RegistrySnapshot,
    global: &GlobalState,
    probability: f64,
    now: DateTime<Utc>,
) -> Event {
    let participants = select_participants(pattern, snapshot);
    let epicenter = epicenter(&participants, snapshot);
    Event {
        id: EventId::new(),
        pattern_id: pattern.id.clone(),
        name: pattern.name.clone(),
        event_type: pattern.event_type,
        intensity: Intensity::from_score(intensity_score(pattern, global)),
        phase: EventPhase::Gestation,
        started_at: now,
        ended_at: None,
        planned_duration_secs: pattern.typical_duration_secs,
        participants,
        affected: snapshot.online_ids(),
        epicenter,
        intensity_per_agent: BTreeMap::new(),
        applied_effects: effects::applied_effects(pattern.event_type),
        impact_metrics: BTreeMap::new(),
        origin_context: global.clone(),
        trigger_probability: probability,
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use resonance_types::{EventType, GlobalScalar};

    use super::*;
    use crate::aggregator::recompute;
    use crate::pattern::{PatternRegistry, builtin_patterns};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn snapshot(agents: Vec<(&str, MetricMap)>) -> RegistrySnapshot {
        let online: BTreeMap<AgentId, MetricMap> = agents
            .into_iter()
            .map(|(id, m)| (AgentId::from(id), m))
            .collect();
        RegistrySnapshot {
            taken_at: DateTime::<Utc>::UNIX_EPOCH,
            known: online.keys().cloned().collect(),
            online,
        }
    }

    fn pattern(id: &str) -> PatternDefinition {
        PatternRegistry::builtin()
            .get(id)
            .cloned()
            .unwrap_or_else(|| builtin_patterns().remove(0))
    }

    fn policy() -> TriggerPolicy {
        TriggerPolicy::from_config(&OrchestratorConfig::default())
    }

    fn energetic() -> GlobalState {
        GlobalState {
            collective_energy: 60.0,
            ..GlobalState::default()
        }
    }

    #[test]
    fn undampened_probability_is_base() {
        let p = policy().probability(&pattern("research_surge"), &energetic(), 0);
        assert!(close(p, 0.25));
    }

    #[test]
    fn concurrency_cap_dampens() {
        let p = policy().probability(&pattern("research_surge"), &energetic(), 3);
        assert!(close(p, 0.025));
    }

    #[test]
    fn low_energy_caps_every_pattern() {
        let global = GlobalState {
            collective_energy: 20.0,
            emergent_creativity: 1.0,
            systemic_harmony: 1.0,
            ..GlobalState::default()
        };
        for pattern in builtin_patterns() {
            let p = policy().probability(&pattern, &global, 0);
            assert!(p <= DAMPENER * pattern.base_probability + 1e-12, "{}: {p}", pattern.id);
        }
    }

    #[test]
    fn modifiers_follow_their_scalar() {
        let global = GlobalState {
            collective_energy: 60.0,
            emergent_creativity: 0.8,
            systemic_harmony: 0.5,
            ..GlobalState::default()
        };
        let creative = policy().probability(&pattern("creative_convergence"), &global, 0);
        assert!(close(creative, 0.30 * 1.8));
        let harmonic = policy().probability(&pattern("harmonic_resonance"), &global, 0);
        assert!(close(harmonic, 0.20 * 0.5));
        let crisis = policy().probability(&pattern("energy_crisis"), &global, 0);
        assert!(close(crisis, 0.35 * 1.4));
    }

    #[test]
    fn probability_is_clamped() {
        let mut p = pattern("creative_convergence");
        p.base_probability = 0.9;
        let global = GlobalState {
            collective_energy: 60.0,
            emergent_creativity: 1.0,
            ..GlobalState::default()
        };
        assert!(close(policy().probability(&p, &global, 0), 1.0));
    }

    #[test]
    fn certain_pattern_always_fires_once() {
        let mut certain = pattern("research_surge");
        certain.base_probability = 1.0;
        let snap = snapshot(vec![
            ("a", MetricMap::new().with(keys::PROCESSING, true)),
            ("b", MetricMap::new().with(keys::PROCESSING, true)),
            ("c", MetricMap::new().with(keys::PROCESSING, true)),
        ]);
        let global = energetic();
        for seed in 0..50 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let events = policy().trigger(&[&certain], &snap, &global, 0, &mut rng, snap.taken_at);
            assert_eq!(events.len(), 1);
            assert!(events.iter().all(|e| e.phase == EventPhase::Gestation));
        }
    }

    #[test]
    fn impossible_pattern_never_fires() {
        let mut never = pattern("research_surge");
        never.base_probability = 0.0;
        let snap = snapshot(vec![("a", MetricMap::new())]);
        let mut rng = SmallRng::seed_from_u64(7);
        let events = policy().trigger(&[&never], &snap, &energetic(), 0, &mut rng, snap.taken_at);
        assert!(events.is_empty());
    }

    #[test]
    fn flag_strategy_prefers_flagged_and_tops_up() {
        let snap = snapshot(vec![
            ("a", MetricMap::new()),
            ("b", MetricMap::new().with(keys::PROCESSING, true)),
            ("c", MetricMap::new()),
            ("d", MetricMap::new().with(keys::PROCESSING, true)),
        ]);
        let chosen = select_participants(&pattern("research_surge"), &snap);
        // Two flagged, topped up to the minimum of three with "a".
        assert_eq!(chosen.len(), 3);
        assert!(chosen.contains(&AgentId::from("b")));
        assert!(chosen.contains(&AgentId::from("d")));
        assert!(chosen.contains(&AgentId::from("a")));
    }

    #[test]
    fn ranked_strategy_takes_top_agents() {
        let agents: Vec<(String, f64)> = (0..6)
            .map(|i| (format!("agent-{i}"), f64::from(i) / 10.0))
            .collect();
        let snap = snapshot(
            agents
                .iter()
                .map(|(id, c)| (id.as_str(), MetricMap::new().with(keys::CREATIVITY, *c)))
                .collect(),
        );
        let chosen = select_participants(&pattern("creative_convergence"), &snap);
        // min 2 + 2 = 4 highest creativity.
        assert_eq!(chosen.len(), 4);
        assert!(!chosen.contains(&AgentId::from("agent-0")));
        assert!(!chosen.contains(&AgentId::from("agent-1")));
    }

    #[test]
    fn participants_capped_by_online_count() {
        let snap = snapshot(vec![("a", MetricMap::new()), ("b", MetricMap::new())]);
        let chosen = select_participants(&pattern("cognitive_storm"), &snap);
        assert_eq!(chosen.len(), 2);
    }

    #[test]
    fn epicenter_maximizes_weighted_score() {
        let snap = snapshot(vec![
            ("a", MetricMap::new().with(keys::ENERGY, 90.0)),
            ("b", MetricMap::new().with(keys::ACTIVITY_LEVEL, 1.0)),
            ("c", MetricMap::new()),
        ]);
        let participants = snap.online_ids();
        // a: 27 + 20 + 15 = 62; b: 15 + 40 + 15 = 70; c: 15 + 20 + 15 = 50.
        assert_eq!(epicenter(&participants, &snap), Some(AgentId::from("b")));
    }

    #[test]
    fn epicenter_ties_go_to_smallest_id() {
        let snap = snapshot(vec![("b", MetricMap::new()), ("a", MetricMap::new())]);
        assert_eq!(epicenter(&snap.online_ids(), &snap), Some(AgentId::from("a")));
    }

    #[test]
    fn intensity_score_accumulates_bonuses() {
        let global = GlobalState {
            collective_energy: 90.0,
            synchronization_level: 1.0,
            online_agents: (0..5).map(|i| AgentId::new(format!("a{i}"))).collect(),
            ..GlobalState::default()
        };
        // 0.2 + 0.2 + 0.1 + 1.0 * 0.4
        let score = intensity_score(&pattern("great_alignment"), &global);
        assert!(close(score, 0.9));
        assert_eq!(Intensity::from_score(score), Intensity::Cataclysmic);
    }

    #[test]
    fn instantiated_event_holds_invariants() {
        let snap = snapshot(vec![
            ("a", MetricMap::new().with(keys::ENERGY, 20.0)),
            ("b", MetricMap::new().with(keys::ENERGY, 25.0)),
            ("c", MetricMap::new().with(keys::ENERGY, 90.0)),
            ("d", MetricMap::new().with(keys::ENERGY, 30.0)),
            ("e", MetricMap::new().with(keys::ENERGY, 60.0)),
        ]);
        let global = recompute(&snap);
        let event = instantiate(&pattern("energy_crisis"), &snap, &global, 0.5, snap.taken_at);
        assert_eq!(event.event_type, EventType::EnergyCrisis);
        assert!(event.participants.is_subset(&event.affected));
        assert!(event.epicenter.as_ref().is_none_or(|e| event.participants.contains(e)));
        assert_eq!(event.affected.len(), 5);
        // Lowest four energies.
        assert!(!event.participants.contains(&AgentId::from("c")));
    }

    #[test]
    fn signature_scalar_drives_bonus() {
        let p = pattern("cognitive_storm");
        assert_eq!(
            p.intensity_bonus.map(|b| b.scalar),
            Some(GlobalScalar::CognitiveTurbulence)
        );
    }
}
