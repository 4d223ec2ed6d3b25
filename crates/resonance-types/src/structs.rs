//! Core entity structs: collective state, events, statistics, and the
//! read-only status and persisted projections built from them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{EventPhase, EventType, Intensity};
use crate::ids::{AgentId, EventId};

// ---------------------------------------------------------------------------
// Global State
// ---------------------------------------------------------------------------

/// Collective indicators derived from every online agent's telemetry.
///
/// Recomputed from scratch every tick; nothing here accumulates across
/// ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GlobalState {
    /// Mean energy of online agents, `[0, 100]`.
    pub collective_energy: f64,
    /// Agreement of activity labels, `[0, 1]`.
    pub synchronization_level: f64,
    /// Mean creativity of online agents, `[0, 1]`.
    pub emergent_creativity: f64,
    /// Balance of performance level, performance spread, and conflicts, `[0, 1]`.
    pub systemic_harmony: f64,
    /// Energy spread, state churn, and error load, `[0, 1]`.
    pub cognitive_turbulence: f64,
    /// Themes shared by at least two online agents.
    pub resonant_themes: BTreeSet<String>,
    /// The theme held by at least half the online agents, if any.
    pub collective_focus: Option<String>,
    /// Agents whose telemetry is within the staleness window.
    pub online_agents: BTreeSet<AgentId>,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            collective_energy: 50.0,
            synchronization_level: 0.0,
            emergent_creativity: 0.5,
            systemic_harmony: 0.5,
            cognitive_turbulence: 0.0,
            resonant_themes: BTreeSet::new(),
            collective_focus: None,
            online_agents: BTreeSet::new(),
        }
    }
}

/// The durable subset of [`GlobalState`].
///
/// The online agent set is not persisted; only its size is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GlobalStateSummary {
    /// See [`GlobalState::collective_energy`].
    pub collective_energy: f64,
    /// See [`GlobalState::synchronization_level`].
    pub synchronization_level: f64,
    /// See [`GlobalState::emergent_creativity`].
    pub emergent_creativity: f64,
    /// See [`GlobalState::systemic_harmony`].
    pub systemic_harmony: f64,
    /// See [`GlobalState::cognitive_turbulence`].
    pub cognitive_turbulence: f64,
    /// See [`GlobalState::resonant_themes`].
    pub resonant_themes: BTreeSet<String>,
    /// See [`GlobalState::collective_focus`].
    pub collective_focus: Option<String>,
    /// Number of agents that were online when the summary was taken.
    pub online_count: u32,
}

impl Default for GlobalStateSummary {
    fn default() -> Self {
        Self::from(&GlobalState::default())
    }
}

impl From<&GlobalState> for GlobalStateSummary {
    fn from(state: &GlobalState) -> Self {
        Self {
            collective_energy: state.collective_energy,
            synchronization_level: state.synchronization_level,
            emergent_creativity: state.emergent_creativity,
            systemic_harmony: state.systemic_harmony,
            cognitive_turbulence: state.cognitive_turbulence,
            resonant_themes: state.resonant_themes.clone(),
            collective_focus: state.collective_focus.clone(),
            online_count: u32::try_from(state.online_agents.len()).unwrap_or(u32::MAX),
        }
    }
}

impl GlobalStateSummary {
    /// Rebuild a [`GlobalState`] from the summary. The online set is empty
    /// until the next recompute.
    pub fn to_global_state(&self) -> GlobalState {
        GlobalState {
            collective_energy: self.collective_energy,
            synchronization_level: self.synchronization_level,
            emergent_creativity: self.emergent_creativity,
            systemic_harmony: self.systemic_harmony,
            cognitive_turbulence: self.cognitive_turbulence,
            resonant_themes: self.resonant_themes.clone(),
            collective_focus: self.collective_focus.clone(),
            online_agents: BTreeSet::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// Well-known keys of [`Event::impact_metrics`], filled at finalization.
pub mod impact_keys {
    /// Wall-clock lifetime of the event in seconds.
    pub const DURATION_SECONDS: &str = "duration_seconds";
    /// Number of participants.
    pub const PARTICIPANT_COUNT: &str = "participant_count";
    /// Number of affected agents.
    pub const AFFECTED_COUNT: &str = "affected_count";
    /// Mean of the per-agent intensities.
    pub const MEAN_INTENSITY_PER_AGENT: &str = "mean_intensity_per_agent";
}

/// A time-boxed global event promoted from a matched pattern.
///
/// Invariants: `participants` is a subset of `affected`; `epicenter`, when
/// set, is a participant; every value in `intensity_per_agent` is within
/// `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Event {
    /// Unique event identifier.
    pub id: EventId,
    /// Id of the pattern that spawned this event.
    pub pattern_id: String,
    /// Human-readable pattern name.
    pub name: String,
    /// Event kind.
    pub event_type: EventType,
    /// Ordinal strength.
    pub intensity: Intensity,
    /// Current lifecycle phase.
    pub phase: EventPhase,
    /// When the event was triggered.
    pub started_at: DateTime<Utc>,
    /// When the event was finalized.
    pub ended_at: Option<DateTime<Utc>>,
    /// Planned lifetime in seconds.
    pub planned_duration_secs: u64,
    /// Agents selected as active participants.
    pub participants: BTreeSet<AgentId>,
    /// Every agent online at trigger time.
    pub affected: BTreeSet<AgentId>,
    /// The participant that amplified the event most strongly.
    pub epicenter: Option<AgentId>,
    /// Per-agent intensity in `[0, 1]`.
    pub intensity_per_agent: BTreeMap<AgentId, f64>,
    /// Named effect deltas the event applied.
    pub applied_effects: BTreeMap<String, f64>,
    /// Summary figures computed at finalization.
    pub impact_metrics: BTreeMap<String, f64>,
    /// Global state at trigger time.
    pub origin_context: GlobalState,
    /// Trigger probability that was drawn against.
    pub trigger_probability: f64,
}

impl Event {
    /// Seconds since the event started, never negative.
    #[allow(clippy::cast_precision_loss)]
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> f64 {
        let millis = now
            .signed_duration_since(self.started_at)
            .num_milliseconds()
            .max(0);
        millis as f64 / 1000.0
    }

    /// Elapsed time as a fraction of the planned duration.
    ///
    /// A zero planned duration counts as already complete.
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self, now: DateTime<Utc>) -> f64 {
        if self.planned_duration_secs == 0 {
            return 1.0;
        }
        self.elapsed_secs(now) / self.planned_duration_secs as f64
    }

    /// Mean per-agent intensity, or 0 when nobody was affected.
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_intensity(&self) -> f64 {
        if self.intensity_per_agent.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.intensity_per_agent.values().sum();
        sum / self.intensity_per_agent.len() as f64
    }

    /// Build the read-only summary at the given instant.
    pub fn summary(&self, now: DateTime<Utc>) -> EventSummary {
        let progress = if self.phase.is_terminal() {
            1.0
        } else {
            self.progress(now).min(1.0)
        };
        EventSummary {
            id: self.id,
            pattern_id: self.pattern_id.clone(),
            name: self.name.clone(),
            event_type: self.event_type,
            intensity: self.intensity,
            phase: self.phase,
            started_at: self.started_at,
            ended_at: self.ended_at,
            planned_duration_secs: self.planned_duration_secs,
            progress,
            participant_count: u32::try_from(self.participants.len()).unwrap_or(u32::MAX),
            affected_count: u32::try_from(self.affected.len()).unwrap_or(u32::MAX),
            epicenter: self.epicenter.clone(),
        }
    }
}

/// Read-only projection of an [`Event`] for status consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EventSummary {
    /// Event identifier.
    pub id: EventId,
    /// Originating pattern id.
    pub pattern_id: String,
    /// Human-readable pattern name.
    pub name: String,
    /// Event kind.
    pub event_type: EventType,
    /// Ordinal strength.
    pub intensity: Intensity,
    /// Lifecycle phase at summary time.
    pub phase: EventPhase,
    /// Trigger time.
    pub started_at: DateTime<Utc>,
    /// Finalization time, if finalized.
    pub ended_at: Option<DateTime<Utc>>,
    /// Planned lifetime in seconds.
    pub planned_duration_secs: u64,
    /// Progress ratio, capped at 1.
    pub progress: f64,
    /// Number of participants.
    pub participant_count: u32,
    /// Number of affected agents.
    pub affected_count: u32,
    /// Epicenter agent, if any.
    pub epicenter: Option<AgentId>,
}

/// One entry in an agent's bounded participation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ParticipationEntry {
    /// The event the agent was affected by.
    pub event_id: EventId,
    /// Its kind.
    pub event_type: EventType,
    /// The agent's intensity in that event.
    pub intensity: f64,
    /// Whether the agent was a participant (as opposed to only affected).
    pub participant: bool,
    /// When the effect was applied.
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Cumulative counters. Missing map entries read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Statistics {
    /// Events triggered since first start.
    pub events_detected: u64,
    /// Events finalized into history.
    pub events_completed: u64,
    /// Sum of participant counts over all triggered events.
    pub participation_total: u64,
    /// Triggered events per [`EventType::as_str`] name.
    pub events_by_type: BTreeMap<String, u64>,
}

impl Statistics {
    /// Count a newly triggered event.
    pub fn record_detected(&mut self, event_type: EventType, participants: usize) {
        self.events_detected = self.events_detected.saturating_add(1);
        let participants = u64::try_from(participants).unwrap_or(u64::MAX);
        self.participation_total = self.participation_total.saturating_add(participants);
        let slot = self
            .events_by_type
            .entry(event_type.as_str().to_owned())
            .or_insert(0);
        *slot = slot.saturating_add(1);
    }

    /// Count a finalized event.
    pub const fn record_completed(&mut self) {
        self.events_completed = self.events_completed.saturating_add(1);
    }

    /// Triggered events of one type.
    pub fn detected_of(&self, event_type: EventType) -> u64 {
        self.events_by_type
            .get(event_type.as_str())
            .copied()
            .unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Status and persisted projections
// ---------------------------------------------------------------------------

/// Read-only snapshot for display layers and tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StatusReport {
    /// When the report was built.
    pub generated_at: DateTime<Utc>,
    /// Ticks executed by this orchestrator instance.
    pub tick_count: u64,
    /// Latest collective state.
    pub global_state: GlobalState,
    /// Events currently in their lifecycle.
    pub active_events: Vec<EventSummary>,
    /// Most recently finalized events, newest first.
    pub recent_history: Vec<EventSummary>,
    /// Cumulative counters.
    pub statistics: Statistics,
}

/// The durable aggregate record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PersistedState {
    /// Latest collective state summary.
    pub global_state: GlobalStateSummary,
    /// Cumulative counters.
    pub statistics: Statistics,
    /// When the record was produced.
    pub last_updated: DateTime<Utc>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            global_state: GlobalStateSummary::default(),
            statistics: Statistics::default(),
            last_updated: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}
