//! Enumeration types for the Resonance orchestrator.
//!
//! Event types, intensities, and lifecycle phases are closed sets. The
//! ordinal enums ([`Intensity`], [`EventPhase`]) derive `Ord` in declaration
//! order, so comparisons such as `phase >= EventPhase::Peak` follow the
//! lifecycle.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::structs::GlobalState;

// ---------------------------------------------------------------------------
// Event Type
// ---------------------------------------------------------------------------

/// The kind of global event a pattern promotes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum EventType {
    /// Several agents reach high creativity at the same time.
    CreativeConvergence,
    /// Many agents are busy processing in parallel.
    ResearchSurge,
    /// Conflict-free, high-performing collective.
    HarmonicResonance,
    /// Collective energy is collapsing.
    EnergyCrisis,
    /// Energy spread, state churn, and errors are all high.
    CognitiveStorm,
    /// Every known agent is online and acting in lockstep.
    GreatAlignment,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::CreativeConvergence,
        Self::ResearchSurge,
        Self::HarmonicResonance,
        Self::EnergyCrisis,
        Self::CognitiveStorm,
        Self::GreatAlignment,
    ];

    /// Stable `snake_case` name used as a statistics key and in persisted state.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreativeConvergence => "creative_convergence",
            Self::ResearchSurge => "research_surge",
            Self::HarmonicResonance => "harmonic_resonance",
            Self::EnergyCrisis => "energy_crisis",
            Self::CognitiveStorm => "cognitive_storm",
            Self::GreatAlignment => "great_alignment",
        }
    }

    /// Parse a persisted name back into an event type.
    ///
    /// Returns `None` for names this build does not know about.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Intensity
// ---------------------------------------------------------------------------

/// Ordinal strength of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Intensity {
    /// Barely noticeable.
    Subtle,
    /// Noticeable by participants.
    Moderate,
    /// Felt by every affected agent.
    Strong,
    /// Dominates agent behavior while active.
    Intense,
    /// System-wide upheaval.
    Cataclysmic,
}

impl Intensity {
    /// Map a weighted score onto the ordinal scale.
    ///
    /// Cutoffs are `0.9`, `0.7`, `0.5`, `0.3` (inclusive lower bounds).
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            Self::Cataclysmic
        } else if score >= 0.7 {
            Self::Intense
        } else if score >= 0.5 {
            Self::Strong
        } else if score >= 0.3 {
            Self::Moderate
        } else {
            Self::Subtle
        }
    }

    /// Base per-agent intensity before role and sensitivity scaling.
    pub const fn base_intensity(self) -> f64 {
        match self {
            Self::Subtle => 0.2,
            Self::Moderate => 0.4,
            Self::Strong => 0.6,
            Self::Intense => 0.8,
            Self::Cataclysmic => 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Event Phase
// ---------------------------------------------------------------------------

/// Lifecycle phase of an event. Phases only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum EventPhase {
    /// Forming; `progress < 0.1`.
    Gestation,
    /// Becoming visible; `progress < 0.3`.
    Manifestation,
    /// Full strength; `progress < 0.6`.
    Peak,
    /// Fading; `progress < 0.9`.
    Decline,
    /// Being absorbed; `progress >= 0.9`. Triggers finalization.
    Integration,
    /// Finalized and archived in history (terminal).
    Memory,
}

impl EventPhase {
    /// The phase an active event should be in at the given progress ratio.
    ///
    /// Never returns [`EventPhase::Memory`]; that phase is only entered
    /// through finalization.
    pub fn for_progress(progress: f64) -> Self {
        if progress < 0.1 {
            Self::Gestation
        } else if progress < 0.3 {
            Self::Manifestation
        } else if progress < 0.6 {
            Self::Peak
        } else if progress < 0.9 {
            Self::Decline
        } else {
            Self::Integration
        }
    }

    /// Move forward to `target` if it lies ahead; never moves backward.
    ///
    /// Returns `true` if the phase changed.
    pub fn advance_to(&mut self, target: Self) -> bool {
        if target > *self {
            *self = target;
            true
        } else {
            false
        }
    }

    /// Whether this is the terminal phase.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Memory)
    }
}

// ---------------------------------------------------------------------------
// Global Scalar
// ---------------------------------------------------------------------------

/// Names one scalar indicator of [`GlobalState`].
///
/// Patterns refer to collective indicators by name so that predicates,
/// probability multipliers, and intensity bonuses stay declarative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum GlobalScalar {
    /// Mean agent energy, `[0, 100]`.
    CollectiveEnergy,
    /// Activity-label agreement, `[0, 1]`.
    SynchronizationLevel,
    /// Mean creativity, `[0, 1]`.
    EmergentCreativity,
    /// Performance and conflict balance, `[0, 1]`.
    SystemicHarmony,
    /// Energy spread, churn, and errors, `[0, 1]`.
    CognitiveTurbulence,
}

impl GlobalScalar {
    /// Read this scalar from a global state snapshot.
    pub const fn read(self, state: &GlobalState) -> f64 {
        match self {
            Self::CollectiveEnergy => state.collective_energy,
            Self::SynchronizationLevel => state.synchronization_level,
            Self::EmergentCreativity => state.emergent_creativity,
            Self::SystemicHarmony => state.systemic_harmony,
            Self::CognitiveTurbulence => state.cognitive_turbulence,
        }
    }
}
