//! The orchestrator context: one explicitly constructed instance that owns
//! the registry, the pattern catalogue, and the mutable detection state.
//!
//! Each tick runs these phases in order:
//!
//! 1. **Snapshot** -- copy the online agents once and prune stale records.
//! 2. **Aggregate** -- recompute [`GlobalState`] from the snapshot.
//! 3. **Match** -- evaluate every registered pattern against the snapshot.
//! 4. **Trigger** -- draw once per matched pattern and instantiate events.
//! 5. **Propagate** -- push the new events' effects into agent telemetry.
//! 6. **Lifecycle** -- advance and retire the events that were already active.
//! 7. **Feedback** -- deliver effect deltas to registered sinks once the
//!    tick lock is released.
//!
//! Persistence is not a tick phase; hosts read [`Orchestrator::persisted_state`]
//! after a tick and hand it to the store off the hot path.
//!
//! Ingestion only takes the registry lock, so it never waits on a tick. The
//! tick holds the core lock for its whole body, so ticks never overlap.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use resonance_types::{
    AgentId, Event, EventSummary, GlobalState, MetricMap, ParticipationEntry, PersistedState,
    Statistics, StatusReport,
};
use tracing::{debug, info};

use crate::aggregator;
use crate::clock::Clock;
use crate::config::OrchestratorConfig;
use crate::effects::{self, EffectSink, SinkMap};
use crate::lifecycle::{EventLedger, PhaseTransition};
use crate::pattern::{MatchContext, PatternRegistry};
use crate::registry::{MetricsRegistry, RegistrySnapshot};
use crate::trigger::TriggerPolicy;

/// Summary of one tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// The instant the tick ran at.
    pub at: DateTime<Utc>,
    /// Agents online in the tick's snapshot.
    pub online_count: usize,
    /// Agents removed as stale.
    pub pruned: Vec<AgentId>,
    /// Ids of the patterns that matched.
    pub matched: Vec<String>,
    /// Events created this tick.
    pub triggered: Vec<EventSummary>,
    /// Phase changes of pre-existing events.
    pub transitions: Vec<PhaseTransition>,
    /// Events finalized this tick.
    pub finalized: Vec<EventSummary>,
    /// Active events after the tick.
    pub active_count: usize,
    /// The recomputed collective state.
    pub global_state: GlobalState,
}

/// Mutable state guarded by the tick lock.
#[derive(Debug)]
struct CoreState {
    global: GlobalState,
    ledger: EventLedger,
    statistics: Statistics,
    rng: StdRng,
    tick_count: u64,
}

/// The global event orchestrator.
pub struct Orchestrator {
    config: OrchestratorConfig,
    patterns: PatternRegistry,
    registry: MetricsRegistry,
    clock: Arc<dyn Clock>,
    sinks: RwLock<SinkMap>,
    core: Mutex<CoreState>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("patterns", &self.patterns.len())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator with the built-in pattern catalogue.
    pub fn new(config: OrchestratorConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_patterns(config, PatternRegistry::builtin(), clock)
    }

    /// Create an orchestrator with a caller-supplied pattern catalogue.
    pub fn with_patterns(
        config: OrchestratorConfig,
        patterns: PatternRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let rng = config
            .seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        let core = CoreState {
            global: GlobalState::default(),
            ledger: EventLedger::new(config.history_capacity),
            statistics: Statistics::default(),
            rng,
            tick_count: 0,
        };
        info!(
            patterns = patterns.len(),
            staleness_window_secs = config.staleness_window_secs,
            seeded = config.seed.is_some(),
            "Orchestrator created"
        );
        Self {
            config,
            patterns,
            registry: MetricsRegistry::new(),
            clock,
            sinks: RwLock::new(SinkMap::new()),
            core: Mutex::new(core),
        }
    }

    fn lock_core(&self) -> MutexGuard<'_, CoreState> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Collaborator entry points
    // -----------------------------------------------------------------------

    /// Store the latest telemetry for an agent. Never fails; unknown keys
    /// are kept as-is.
    pub fn update_agent_metrics(&self, agent_id: impl Into<AgentId>, metrics: MetricMap) {
        let agent_id = agent_id.into();
        debug!(agent_id = %agent_id, metrics = metrics.len(), "Telemetry ingested");
        self.registry.ingest(agent_id, metrics, self.clock.now());
    }

    /// Register the effect callback of one agent, replacing any earlier one.
    pub fn register_effect_sink(&self, agent_id: impl Into<AgentId>, sink: Arc<dyn EffectSink>) {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(agent_id.into(), sink);
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    fn known_universe(&self, snapshot: &RegistrySnapshot) -> BTreeSet<AgentId> {
        if self.config.known_agents.is_empty() {
            snapshot.known.clone()
        } else {
            self.config.known_agents.iter().cloned().collect()
        }
    }

    fn take_snapshot(&self, now: DateTime<Utc>) -> RegistrySnapshot {
        self.registry.snapshot(now, self.config.staleness_window())
    }

    /// Run one detection-and-lifecycle tick.
    pub fn tick(&self) -> TickReport {
        let mut guard = self.lock_core();
        let core = &mut *guard;
        let now = self.clock.now();
        core.tick_count = core.tick_count.saturating_add(1);
        let tick = core.tick_count;

        // --- Phase 1: Snapshot ---
        let snapshot = self.take_snapshot(now);
        let pruned = self
            .registry
            .prune_stale(now, self.config.staleness_window());
        if !pruned.is_empty() {
            debug!(tick, pruned = pruned.len(), "Stale agents pruned");
        }

        // --- Phase 2: Aggregate ---
        let global = aggregator::recompute(&snapshot);
        debug!(
            tick,
            online = snapshot.online_count(),
            energy = global.collective_energy,
            sync = global.synchronization_level,
            "Global state recomputed"
        );

        // --- Phase 3: Match ---
        let universe = self.known_universe(&snapshot);
        let ctx = MatchContext {
            snapshot: &snapshot,
            global: &global,
            known_universe: &universe,
        };
        let matched = self.patterns.matched(&ctx);
        for pattern in self.patterns.iter().filter(|p| !p.matches(&ctx)) {
            debug!(
                tick,
                pattern = %pattern.id,
                failing = ?pattern.failing_conditions(&ctx),
                "Pattern not matched"
            );
        }

        // --- Phase 4: Trigger ---
        let policy = TriggerPolicy::from_config(&self.config);
        let active_before = core.ledger.active_count();
        let mut spawned =
            policy.trigger(&matched, &snapshot, &global, active_before, &mut core.rng, now);

        // --- Phase 5: Propagate ---
        let mut deliveries = Vec::new();
        {
            let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
            for event in &mut spawned {
                let propagation =
                    effects::propagate(event, &self.config, &self.registry, &sinks, now);
                deliveries.extend(propagation.deliveries);
                core.statistics
                    .record_detected(event.event_type, event.participants.len());
            }
        }

        // --- Phase 6: Lifecycle ---
        let lifecycle = core.ledger.advance_all(now);
        for _ in &lifecycle.finalized {
            core.statistics.record_completed();
        }

        let triggered: Vec<EventSummary> = spawned.iter().map(|e| e.summary(now)).collect();
        for event in spawned {
            core.ledger.push_active(event);
        }
        core.global = global.clone();

        let report = TickReport {
            tick,
            at: now,
            online_count: snapshot.online_count(),
            pruned,
            matched: matched.iter().map(|p| p.id.clone()).collect(),
            triggered,
            transitions: lifecycle.transitions,
            finalized: lifecycle.finalized,
            active_count: core.ledger.active_count(),
            global_state: global,
        };
        info!(
            tick,
            online = report.online_count,
            matched = report.matched.len(),
            triggered = report.triggered.len(),
            finalized = report.finalized.len(),
            active = report.active_count,
            "Tick complete"
        );
        drop(guard);

        // --- Phase 7: Feedback ---
        // Sinks run with no orchestrator lock held, so they may read status
        // or register other sinks.
        for delivery in deliveries {
            delivery.deliver();
        }
        report
    }

    // -----------------------------------------------------------------------
    // Read-only views
    // -----------------------------------------------------------------------

    /// Recompute the collective state from the current registry without
    /// touching the orchestrator's stored state.
    pub fn recompute_global_state(&self) -> GlobalState {
        aggregator::recompute(&self.take_snapshot(self.clock.now()))
    }

    /// Agents currently within the staleness window.
    pub fn online_agents(&self) -> BTreeSet<AgentId> {
        self.registry
            .online_agents(self.clock.now(), self.config.staleness_window())
    }

    /// Ids of the patterns that would match right now.
    pub fn matched_patterns(&self) -> Vec<String> {
        let snapshot = self.take_snapshot(self.clock.now());
        let global = aggregator::recompute(&snapshot);
        let universe = self.known_universe(&snapshot);
        let ctx = MatchContext {
            snapshot: &snapshot,
            global: &global,
            known_universe: &universe,
        };
        self.patterns
            .matched(&ctx)
            .iter()
            .map(|p| p.id.clone())
            .collect()
    }

    /// Trigger probability of one pattern under the last tick's state.
    pub fn probability_of(&self, pattern_id: &str) -> Option<f64> {
        let pattern = self.patterns.get(pattern_id)?;
        let core = self.lock_core();
        let policy = TriggerPolicy::from_config(&self.config);
        Some(policy.probability(pattern, &core.global, core.ledger.active_count()))
    }

    /// Read-only snapshot for display layers.
    pub fn status(&self) -> StatusReport {
        let now = self.clock.now();
        let core = self.lock_core();
        StatusReport {
            generated_at: now,
            tick_count: core.tick_count,
            global_state: core.global.clone(),
            active_events: core.ledger.active().iter().map(|e| e.summary(now)).collect(),
            recent_history: core
                .ledger
                .recent_history(self.config.recent_history_len)
                .map(|e| e.summary(now))
                .collect(),
            statistics: core.statistics.clone(),
        }
    }

    /// The durable aggregate record as of now.
    pub fn persisted_state(&self) -> PersistedState {
        let core = self.lock_core();
        PersistedState {
            global_state: (&core.global).into(),
            statistics: core.statistics.clone(),
            last_updated: self.clock.now(),
        }
    }

    /// Restore aggregate state loaded from the store. Active events and
    /// per-agent telemetry are not part of the record.
    pub fn restore(&self, state: PersistedState) {
        let mut core = self.lock_core();
        core.global = state.global_state.to_global_state();
        core.statistics = state.statistics;
        info!(
            events_detected = core.statistics.events_detected,
            events_completed = core.statistics.events_completed,
            "Aggregate state restored"
        );
    }

    /// Clones of the active events.
    pub fn active_events(&self) -> Vec<Event> {
        self.lock_core().ledger.active().to_vec()
    }

    /// Clones of the finalized events, oldest first.
    pub fn history(&self) -> Vec<Event> {
        self.lock_core().ledger.history().iter().cloned().collect()
    }

    /// Cumulative counters.
    pub fn statistics(&self) -> Statistics {
        self.lock_core().statistics.clone()
    }

    /// One agent's bounded participation history, oldest first.
    pub fn participation_history(&self, agent_id: &AgentId) -> Vec<ParticipationEntry> {
        self.registry.participation_history(agent_id)
    }

    /// One agent's stored telemetry.
    pub fn agent_metrics(&self, agent_id: &AgentId) -> Option<MetricMap> {
        self.registry.metrics_of(agent_id)
    }

    /// The registered patterns.
    pub const fn patterns(&self) -> &PatternRegistry {
        &self.patterns
    }
}
