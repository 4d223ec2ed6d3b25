//! Pattern registry and matcher.
//!
//! A [`PatternDefinition`] describes an emergent multi-agent situation as an
//! ordered list of named predicate checks. Each tick every registered
//! pattern is re-evaluated against the tick's registry snapshot and freshly
//! recomputed [`GlobalState`]. Matching is deterministic given those two
//! inputs.
//!
//! # Predicate kinds
//!
//! | Kind | Holds when |
//! |------|------------|
//! | [`Predicate::CountAtLeast`] | at least `min` online agents have the flag set |
//! | [`Predicate::Mean`] | the mean of an agent metric (or a global scalar) compares true |
//! | [`Predicate::AllKnownOnline`] | every agent of the known universe is online |
//! | [`Predicate::Sum`] | the sum of an agent counter compares true |
//!
//! Definitions are immutable once registered.

use std::collections::BTreeSet;

use resonance_types::{AgentId, EventType, GlobalScalar, GlobalState, keys};

use crate::aggregator;
use crate::registry::RegistrySnapshot;

/// Errors raised when registering a pattern.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PatternError {
    /// A pattern with the same id is already registered.
    #[error("duplicate pattern id: {id}")]
    DuplicateId {
        /// The conflicting id.
        id: String,
    },

    /// The pattern id is empty.
    #[error("pattern id must not be empty")]
    EmptyId,

    /// The base probability lies outside `[0, 1]`.
    #[error("base probability {value} for pattern {id} is outside [0, 1]")]
    InvalidProbability {
        /// The offending pattern.
        id: String,
        /// The rejected probability.
        value: f64,
    },
}

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// Direction of a threshold comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `value >= threshold`.
    AtLeast,
    /// `value <= threshold`.
    AtMost,
}

impl Comparison {
    /// Apply the comparison.
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::AtLeast => value >= threshold,
            Self::AtMost => value <= threshold,
        }
    }
}

/// Where a mean-threshold predicate reads its value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricSource {
    /// The mean of a per-agent metric over online agents.
    Agent {
        /// Metric key.
        key: String,
        /// Value used for agents that do not report the metric.
        default: f64,
    },
    /// A collective indicator from the global state.
    Global(GlobalScalar),
}

/// One predicate check.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// At least `min` online agents report `flag == true`.
    CountAtLeast {
        /// Flag metric key.
        flag: String,
        /// Required number of agents.
        min: u32,
    },
    /// Mean-threshold over agents or a global scalar.
    Mean {
        /// Value source.
        source: MetricSource,
        /// Comparison direction.
        comparison: Comparison,
        /// Threshold.
        threshold: f64,
    },
    /// The online set covers the whole known agent universe.
    AllKnownOnline,
    /// Sum-threshold over a per-agent counter (missing counts as zero).
    Sum {
        /// Counter metric key.
        metric: String,
        /// Comparison direction.
        comparison: Comparison,
        /// Threshold.
        threshold: f64,
    },
}

/// A named predicate within a pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Short name for logs.
    pub name: String,
    /// The check.
    pub predicate: Predicate,
}

impl Condition {
    /// Create a named condition.
    pub fn new(name: &str, predicate: Predicate) -> Self {
        Self {
            name: name.to_owned(),
            predicate,
        }
    }
}

// ---------------------------------------------------------------------------
// Pattern definition
// ---------------------------------------------------------------------------

/// Pattern-specific probability multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbabilityModifier {
    /// No adjustment.
    None,
    /// Multiply by the scalar (harmony-type patterns).
    ScaleBy(GlobalScalar),
    /// Multiply by `1 + scalar` (creativity-type patterns).
    Amplify(GlobalScalar),
    /// Multiply by `1 + (1 - collective_energy / 100)` (low-energy patterns).
    EnergyDeficit,
}

/// How participants are chosen among online agents.
#[derive(Debug, Clone, PartialEq)]
pub enum ParticipantStrategy {
    /// Online agents in id order.
    InOrder,
    /// Highest values of a metric first.
    HighestMetric {
        /// Metric key.
        key: String,
        /// Value for agents that do not report it.
        default: f64,
    },
    /// Lowest values of a metric first.
    LowestMetric {
        /// Metric key.
        key: String,
        /// Value for agents that do not report it.
        default: f64,
    },
    /// Agents with the flag set, topped up to the minimum from the rest.
    FlagSet {
        /// Flag metric key.
        flag: String,
    },
}

/// The pattern's signature scalar and its weight in the intensity score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntensityBonus {
    /// The scalar read from global state (normalized to `[0, 1]`).
    pub scalar: GlobalScalar,
    /// Weight applied to it.
    pub weight: f64,
}

/// A static, immutable description of an emergent pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternDefinition {
    /// Unique id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// The event type spawned on trigger.
    pub event_type: EventType,
    /// Ordered activation conditions; all must hold.
    pub conditions: Vec<Condition>,
    /// Probability before dampeners and modifiers, `[0, 1]`.
    pub base_probability: f64,
    /// Planned event lifetime in seconds.
    pub typical_duration_secs: u64,
    /// Minimum online agents for the pattern to match.
    pub min_participants: u32,
    /// Named effects this pattern is expected to apply.
    pub expected_effect_tags: Vec<String>,
    /// Pattern-specific probability multiplier.
    pub probability_modifier: ProbabilityModifier,
    /// Participant selection.
    pub participant_strategy: ParticipantStrategy,
    /// Signature scalar bonus for the intensity score.
    pub intensity_bonus: Option<IntensityBonus>,
}

/// Everything a predicate may read.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    /// The tick's registry snapshot.
    pub snapshot: &'a RegistrySnapshot,
    /// The tick's recomputed global state.
    pub global: &'a GlobalState,
    /// The known agent universe.
    pub known_universe: &'a BTreeSet<AgentId>,
}

impl Predicate {
    /// Evaluate against the context.
    pub fn holds(&self, ctx: &MatchContext<'_>) -> bool {
        match self {
            Self::CountAtLeast { flag, min } => {
                let count = ctx
                    .snapshot
                    .online
                    .values()
                    .filter(|m| m.flag(flag).unwrap_or(false))
                    .count();
                count >= usize::try_from(*min).unwrap_or(usize::MAX)
            }
            Self::Mean {
                source,
                comparison,
                threshold,
            } => match source {
                MetricSource::Agent { key, default } => {
                    if ctx.snapshot.online.is_empty() {
                        return false;
                    }
                    let values: Vec<f64> = ctx
                        .snapshot
                        .online
                        .values()
                        .map(|m| m.number_or(key, *default))
                        .collect();
                    comparison.holds(aggregator::mean(&values), *threshold)
                }
                MetricSource::Global(scalar) => comparison.holds(scalar.read(ctx.global), *threshold),
            },
            Self::AllKnownOnline => {
                !ctx.known_universe.is_empty()
                    && ctx
                        .known_universe
                        .iter()
                        .all(|id| ctx.snapshot.online.contains_key(id))
            }
            Self::Sum {
                metric,
                comparison,
                threshold,
            } => {
                let total: f64 = ctx
                    .snapshot
                    .online
                    .values()
                    .map(|m| m.number_or(metric, 0.0))
                    .sum();
                comparison.holds(total, *threshold)
            }
        }
    }
}

impl PatternDefinition {
    /// Whether the pattern currently holds: enough online agents and every
    /// condition satisfied.
    pub fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        let enough = ctx.snapshot.online_count()
            >= usize::try_from(self.min_participants).unwrap_or(usize::MAX);
        enough && self.conditions.iter().all(|c| c.predicate.holds(ctx))
    }

    /// Names of the conditions that currently fail.
    pub fn failing_conditions(&self, ctx: &MatchContext<'_>) -> Vec<&str> {
        self.conditions
            .iter()
            .filter(|c| !c.predicate.holds(ctx))
            .map(|c| c.name.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Ordered collection of registered patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternRegistry {
    patterns: Vec<PatternDefinition>,
}

impl PatternRegistry {
    /// An empty registry.
    pub const fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// A registry holding the built-in catalogue.
    pub fn builtin() -> Self {
        Self {
            patterns: builtin_patterns(),
        }
    }

    /// Register a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] for an empty or duplicate id, or a base
    /// probability outside `[0, 1]`.
    pub fn register(&mut self, pattern: PatternDefinition) -> Result<(), PatternError> {
        if pattern.id.is_empty() {
            return Err(PatternError::EmptyId);
        }
        if !(0.0..=1.0).contains(&pattern.base_probability) {
            return Err(PatternError::InvalidProbability {
                id: pattern.id,
                value: pattern.base_probability,
            });
        }
        if self.get(&pattern.id).is_some() {
            return Err(PatternError::DuplicateId { id: pattern.id });
        }
        self.patterns.push(pattern);
        Ok(())
    }

    /// Look up a pattern by id.
    pub fn get(&self, id: &str) -> Option<&PatternDefinition> {
        self.patterns.iter().find(|p| p.id == id)
    }

    /// Iterate in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &PatternDefinition> {
        self.patterns.iter()
    }

    /// Number of registered patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether no patterns are registered.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Every pattern that currently holds, in registration order.
    pub fn matched<'a>(&'a self, ctx: &MatchContext<'_>) -> Vec<&'a PatternDefinition> {
        self.patterns.iter().filter(|p| p.matches(ctx)).collect()
    }
}

// ---------------------------------------------------------------------------
// Built-in catalogue
// ---------------------------------------------------------------------------

fn tags(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_owned()).collect()
}

/// The built-in pattern catalogue.
#[allow(clippy::too_many_lines)]
pub fn builtin_patterns() -> Vec<PatternDefinition> {
    vec![
        PatternDefinition {
            id: "creative_convergence".to_owned(),
            name: "Creative Convergence".to_owned(),
            event_type: EventType::CreativeConvergence,
            conditions: vec![Condition::new(
                "high_mean_creativity",
                Predicate::Mean {
                    source: MetricSource::Agent {
                        key: keys::CREATIVITY.to_owned(),
                        default: keys::CREATIVITY_DEFAULT,
                    },
                    comparison: Comparison::AtLeast,
                    threshold: 0.7,
                },
            )],
            base_probability: 0.30,
            typical_duration_secs: 1800,
            min_participants: 2,
            expected_effect_tags: tags(&["creativityBoost", "energyRegen"]),
            probability_modifier: ProbabilityModifier::Amplify(GlobalScalar::EmergentCreativity),
            participant_strategy: ParticipantStrategy::HighestMetric {
                key: keys::CREATIVITY.to_owned(),
                default: keys::CREATIVITY_DEFAULT,
            },
            intensity_bonus: Some(IntensityBonus {
                scalar: GlobalScalar::EmergentCreativity,
                weight: 0.4,
            }),
        },
        PatternDefinition {
            id: "research_surge".to_owned(),
            name: "Research Surge".to_owned(),
            event_type: EventType::ResearchSurge,
            conditions: vec![Condition::new(
                "three_agents_processing",
                Predicate::CountAtLeast {
                    flag: keys::PROCESSING.to_owned(),
                    min: 3,
                },
            )],
            base_probability: 0.25,
            typical_duration_secs: 1200,
            min_participants: 3,
            expected_effect_tags: tags(&["efficiencyBoost", "energyRegen"]),
            probability_modifier: ProbabilityModifier::None,
            participant_strategy: ParticipantStrategy::FlagSet {
                flag: keys::PROCESSING.to_owned(),
            },
            intensity_bonus: Some(IntensityBonus {
                scalar: GlobalScalar::SynchronizationLevel,
                weight: 0.3,
            }),
        },
        PatternDefinition {
            id: "harmonic_resonance".to_owned(),
            name: "Harmonic Resonance".to_owned(),
            event_type: EventType::HarmonicResonance,
            conditions: vec![
                Condition::new(
                    "no_conflicts",
                    Predicate::Sum {
                        metric: keys::CONFLICTS.to_owned(),
                        comparison: Comparison::AtMost,
                        threshold: 0.0,
                    },
                ),
                Condition::new(
                    "high_mean_performance",
                    Predicate::Mean {
                        source: MetricSource::Agent {
                            key: keys::PERFORMANCE.to_owned(),
                            default: keys::PERFORMANCE_DEFAULT,
                        },
                        comparison: Comparison::AtLeast,
                        threshold: 0.7,
                    },
                ),
            ],
            base_probability: 0.20,
            typical_duration_secs: 2400,
            min_participants: 3,
            expected_effect_tags: tags(&["conflictReduction", "efficiencyBoost"]),
            probability_modifier: ProbabilityModifier::ScaleBy(GlobalScalar::SystemicHarmony),
            participant_strategy: ParticipantStrategy::HighestMetric {
                key: keys::PERFORMANCE.to_owned(),
                default: keys::PERFORMANCE_DEFAULT,
            },
            intensity_bonus: Some(IntensityBonus {
                scalar: GlobalScalar::SystemicHarmony,
                weight: 0.4,
            }),
        },
        PatternDefinition {
            id: "energy_crisis".to_owned(),
            name: "Energy Crisis".to_owned(),
            event_type: EventType::EnergyCrisis,
            conditions: vec![Condition::new(
                "low_mean_energy",
                Predicate::Mean {
                    source: MetricSource::Agent {
                        key: keys::ENERGY.to_owned(),
                        default: keys::ENERGY_DEFAULT,
                    },
                    comparison: Comparison::AtMost,
                    threshold: 35.0,
                },
            )],
            base_probability: 0.35,
            typical_duration_secs: 900,
            min_participants: 2,
            expected_effect_tags: tags(&["energyRegen", "creativityBoost"]),
            probability_modifier: ProbabilityModifier::EnergyDeficit,
            participant_strategy: ParticipantStrategy::LowestMetric {
                key: keys::ENERGY.to_owned(),
                default: keys::ENERGY_DEFAULT,
            },
            intensity_bonus: None,
        },
        PatternDefinition {
            id: "cognitive_storm".to_owned(),
            name: "Cognitive Storm".to_owned(),
            event_type: EventType::CognitiveStorm,
            conditions: vec![Condition::new(
                "high_turbulence",
                Predicate::Mean {
                    source: MetricSource::Global(GlobalScalar::CognitiveTurbulence),
                    comparison: Comparison::AtLeast,
                    threshold: 0.6,
                },
            )],
            base_probability: 0.25,
            typical_duration_secs: 600,
            min_participants: 2,
            expected_effect_tags: tags(&["creativityBoost", "conflictReduction"]),
            probability_modifier: ProbabilityModifier::None,
            participant_strategy: ParticipantStrategy::InOrder,
            intensity_bonus: Some(IntensityBonus {
                scalar: GlobalScalar::CognitiveTurbulence,
                weight: 0.3,
            }),
        },
        PatternDefinition {
            id: "great_alignment".to_owned(),
            name: "Great Alignment".to_owned(),
            event_type: EventType::GreatAlignment,
            conditions: vec![
                Condition::new("everyone_online", Predicate::AllKnownOnline),
                Condition::new(
                    "high_synchronization",
                    Predicate::Mean {
                        source: MetricSource::Global(GlobalScalar::SynchronizationLevel),
                        comparison: Comparison::AtLeast,
                        threshold: 0.8,
                    },
                ),
            ],
            base_probability: 0.15,
            typical_duration_secs: 3600,
            min_participants: 3,
            expected_effect_tags: tags(&["energyRegen", "efficiencyBoost", "creativityBoost"]),
            probability_modifier: ProbabilityModifier::None,
            participant_strategy: ParticipantStrategy::InOrder,
            intensity_bonus: Some(IntensityBonus {
                scalar: GlobalScalar::SynchronizationLevel,
                weight: 0.4,
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{DateTime, Utc};
    use resonance_types::{AgentId, MetricMap};

    use super::*;
    use crate::aggregator::recompute;

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

    fn processing(energy: f64) -> MetricMap {
        MetricMap::new()
            .with(keys::ENERGY, energy)
            .with(keys::ACTIVITY_LABEL, "research")
            .with(keys::PROCESSING, true)
    }

    fn matched_ids(registry: &PatternRegistry, snap: &RegistrySnapshot) -> Vec<String> {
        let global = recompute(snap);
        let ctx = MatchContext {
            snapshot: snap,
            global: &global,
            known_universe: &snap.known,
        };
        registry.matched(&ctx).iter().map(|p| p.id.clone()).collect()
    }

    #[test]
    fn three_processing_agents_match_research_surge() {
        let snap = snapshot(vec![
            ("a", processing(90.0)),
            ("b", processing(90.0)),
            ("c", processing(90.0)),
        ]);
        let ids = matched_ids(&PatternRegistry::builtin(), &snap);
        assert!(ids.contains(&"research_surge".to_owned()));
    }

    #[test]
    fn two_processing_agents_do_not_match() {
        let snap = snapshot(vec![
            ("a", processing(90.0)),
            ("b", processing(90.0)),
            ("c", MetricMap::new()),
        ]);
        let ids = matched_ids(&PatternRegistry::builtin(), &snap);
        assert!(!ids.contains(&"research_surge".to_owned()));
    }

    #[test]
    fn min_participants_gates_matching() {
        let snap = snapshot(vec![
            ("a", MetricMap::new().with(keys::ENERGY, 10.0)),
        ]);
        // Mean energy 10 satisfies the condition but one agent is too few.
        let ids = matched_ids(&PatternRegistry::builtin(), &snap);
        assert!(!ids.contains(&"energy_crisis".to_owned()));
    }

    #[test]
    fn sum_threshold_blocks_harmony_on_conflict() {
        let calm = MetricMap::new().with(keys::PERFORMANCE, 0.9);
        let snap = snapshot(vec![
            ("a", calm.clone()),
            ("b", calm.clone()),
            ("c", calm.clone().with(keys::CONFLICTS, 1.0)),
        ]);
        let ids = matched_ids(&PatternRegistry::builtin(), &snap);
        assert!(!ids.contains(&"harmonic_resonance".to_owned()));

        let snap = snapshot(vec![("a", calm.clone()), ("b", calm.clone()), ("c", calm)]);
        let ids = matched_ids(&PatternRegistry::builtin(), &snap);
        assert!(ids.contains(&"harmonic_resonance".to_owned()));
    }

    #[test]
    fn all_known_online_requires_full_universe() {
        let snap = snapshot(vec![
            ("a", processing(50.0)),
            ("b", processing(50.0)),
            ("c", processing(50.0)),
        ]);
        let global = recompute(&snap);
        let mut universe = snap.known.clone();

        let ctx = MatchContext {
            snapshot: &snap,
            global: &global,
            known_universe: &universe,
        };
        assert!(Predicate::AllKnownOnline.holds(&ctx));

        universe.insert(AgentId::from("absent"));
        let ctx = MatchContext {
            snapshot: &snap,
            global: &global,
            known_universe: &universe,
        };
        assert!(!Predicate::AllKnownOnline.holds(&ctx));
    }

    #[test]
    fn failing_conditions_are_named() {
        let snap = snapshot(vec![("a", MetricMap::new()), ("b", MetricMap::new())]);
        let global = recompute(&snap);
        let ctx = MatchContext {
            snapshot: &snap,
            global: &global,
            known_universe: &snap.known,
        };
        let registry = PatternRegistry::builtin();
        let crisis = registry.get("energy_crisis");
        assert!(crisis.is_some());
        if let Some(crisis) = crisis {
            assert_eq!(crisis.failing_conditions(&ctx), vec!["low_mean_energy"]);
        }
    }

    #[test]
    fn register_rejects_duplicates_and_bad_probability() {
        let mut registry = PatternRegistry::builtin();
        let mut dup = builtin_patterns().remove(0);
        assert_eq!(
            registry.register(dup.clone()),
            Err(PatternError::DuplicateId {
                id: "creative_convergence".to_owned()
            })
        );

        dup.id = "custom".to_owned();
        dup.base_probability = 1.5;
        assert!(matches!(
            registry.register(dup.clone()),
            Err(PatternError::InvalidProbability { .. })
        ));

        dup.base_probability = 0.5;
        assert!(registry.register(dup).is_ok());
        assert_eq!(registry.len(), 7);
    }

    #[test]
    fn builtin_ids_are_unique() {
        let patterns = builtin_patterns();
        let ids: BTreeSet<&str> = patterns.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids.len(), patterns.len());
    }
}
