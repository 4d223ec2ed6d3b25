//! Metrics registry: the latest telemetry snapshot per agent.
//!
//! Ingestion arrives concurrently from many agent subsystems, so the record
//! map lives behind a [`Mutex`] that is held only for the duration of a
//! single insert or copy. The tick never works on the live map: it takes a
//! [`RegistrySnapshot`] once at tick start and reads that for every
//! downstream phase.
//!
//! Staleness is evaluated against the caller-supplied instant. Agents whose
//! last update is older than the window are excluded from snapshots
//! immediately, and removed from the map on the next [`MetricsRegistry::prune_stale`].

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use resonance_types::{AgentId, MetricMap, ParticipationEntry};

/// Everything the registry stores for one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRecord {
    /// The latest telemetry, replaced wholesale on every ingest.
    pub metrics: MetricMap,
    /// When the latest telemetry arrived.
    pub last_update: DateTime<Utc>,
    /// Bounded history of events that affected this agent, oldest first.
    pub participations: VecDeque<ParticipationEntry>,
}

impl AgentRecord {
    fn is_online(&self, now: DateTime<Utc>, window: TimeDelta) -> bool {
        now.signed_duration_since(self.last_update) <= window
    }
}

/// A consistent copy of the online agents taken at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    /// The instant the snapshot was taken.
    pub taken_at: DateTime<Utc>,
    /// Telemetry of every online agent.
    pub online: BTreeMap<AgentId, MetricMap>,
    /// Every agent the registry has ever ingested, online or not.
    pub known: BTreeSet<AgentId>,
}

impl RegistrySnapshot {
    /// Number of online agents.
    pub fn online_count(&self) -> usize {
        self.online.len()
    }

    /// The online agent ids.
    pub fn online_ids(&self) -> BTreeSet<AgentId> {
        self.online.keys().cloned().collect()
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    records: BTreeMap<AgentId, AgentRecord>,
    known: BTreeSet<AgentId>,
}

/// Thread-safe store of per-agent telemetry.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    inner: Mutex<RegistryInner>,
}

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the stored telemetry for `agent_id` and stamp it with `now`.
    ///
    /// Last write wins. The agent's participation history survives.
    pub fn ingest(&self, agent_id: AgentId, metrics: MetricMap, now: DateTime<Utc>) {
        let mut inner = self.lock();
        inner.known.insert(agent_id.clone());
        match inner.records.get_mut(&agent_id) {
            Some(record) => {
                record.metrics = metrics;
                record.last_update = now;
            }
            None => {
                inner.records.insert(
                    agent_id,
                    AgentRecord {
                        metrics,
                        last_update: now,
                        participations: VecDeque::new(),
                    },
                );
            }
        }
    }

    /// Agents whose last update lies within `window` of `now`.
    pub fn online_agents(&self, now: DateTime<Utc>, window: TimeDelta) -> BTreeSet<AgentId> {
        self.lock()
            .records
            .iter()
            .filter(|(_, record)| record.is_online(now, window))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Copy the telemetry of every online agent.
    pub fn snapshot(&self, now: DateTime<Utc>, window: TimeDelta) -> RegistrySnapshot {
        let inner = self.lock();
        let online = inner
            .records
            .iter()
            .filter(|(_, record)| record.is_online(now, window))
            .map(|(id, record)| (id.clone(), record.metrics.clone()))
            .collect();
        RegistrySnapshot {
            taken_at: now,
            online,
            known: inner.known.clone(),
        }
    }

    /// Remove every stale record. Returns the removed agent ids.
    ///
    /// Removed agents stay in the known-agent set.
    pub fn prune_stale(&self, now: DateTime<Utc>, window: TimeDelta) -> Vec<AgentId> {
        let mut inner = self.lock();
        let stale: Vec<AgentId> = inner
            .records
            .iter()
            .filter(|(_, record)| !record.is_online(now, window))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            inner.records.remove(id);
        }
        stale
    }

    /// Mutate one agent's stored telemetry in place.
    ///
    /// Returns `false` if the agent is not in the registry.
    pub fn update_metrics<F>(&self, agent_id: &AgentId, update: F) -> bool
    where
        F: FnOnce(&mut MetricMap),
    {
        let mut inner = self.lock();
        inner.records.get_mut(agent_id).is_some_and(|record| {
            update(&mut record.metrics);
            true
        })
    }

    /// Append a participation entry, evicting the oldest beyond `capacity`.
    pub fn record_participation(
        &self,
        agent_id: &AgentId,
        entry: ParticipationEntry,
        capacity: usize,
    ) {
        let mut inner = self.lock();
        if let Some(record) = inner.records.get_mut(agent_id) {
            record.participations.push_back(entry);
            while record.participations.len() > capacity {
                record.participations.pop_front();
            }
        }
    }

    /// An agent's participation history, oldest first.
    pub fn participation_history(&self, agent_id: &AgentId) -> Vec<ParticipationEntry> {
        self.lock()
            .records
            .get(agent_id)
            .map(|record| record.participations.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// A copy of one agent's stored telemetry.
    pub fn metrics_of(&self, agent_id: &AgentId) -> Option<MetricMap> {
        self.lock()
            .records
            .get(agent_id)
            .map(|record| record.metrics.clone())
    }

    /// Number of records currently held (online or not yet pruned).
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Whether the registry holds no records.
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use resonance_types::{EventId, EventType, keys};

    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(1)
    }

    fn window() -> TimeDelta {
        TimeDelta::minutes(30)
    }

    #[test]
    fn ingest_is_last_write_wins() {
        let registry = MetricsRegistry::new();
        let id = AgentId::from("oracle");
        registry.ingest(id.clone(), MetricMap::new().with(keys::ENERGY, 10.0), t0());
        registry.ingest(id.clone(), MetricMap::new().with(keys::CREATIVITY, 0.9), t0());

        let metrics = registry.metrics_of(&id).unwrap_or_default();
        assert_eq!(metrics.number(keys::ENERGY), None);
        assert!(metrics.number(keys::CREATIVITY).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stale_agents_leave_the_online_set() {
        let registry = MetricsRegistry::new();
        registry.ingest(AgentId::from("old"), MetricMap::new(), t0());
        registry.ingest(
            AgentId::from("fresh"),
            MetricMap::new(),
            t0() + TimeDelta::minutes(30),
        );

        let now = t0() + TimeDelta::minutes(31);
        let online = registry.online_agents(now, window());
        assert!(!online.contains(&AgentId::from("old")));
        assert!(online.contains(&AgentId::from("fresh")));

        // Still stored until pruned.
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn exactly_at_window_is_online() {
        let registry = MetricsRegistry::new();
        registry.ingest(AgentId::from("edge"), MetricMap::new(), t0());
        let online = registry.online_agents(t0() + window(), window());
        assert_eq!(online.len(), 1);
    }

    #[test]
    fn prune_removes_stale_but_remembers_them() {
        let registry = MetricsRegistry::new();
        registry.ingest(AgentId::from("old"), MetricMap::new(), t0());
        let now = t0() + TimeDelta::hours(2);

        let removed = registry.prune_stale(now, window());
        assert_eq!(removed, vec![AgentId::from("old")]);
        assert!(registry.is_empty());

        let snapshot = registry.snapshot(now, window());
        assert!(snapshot.online.is_empty());
        assert!(snapshot.known.contains(&AgentId::from("old")));
    }

    #[test]
    fn participation_history_is_bounded() {
        let registry = MetricsRegistry::new();
        let id = AgentId::from("oracle");
        registry.ingest(id.clone(), MetricMap::new(), t0());

        let mut ids = Vec::new();
        for _ in 0..12 {
            let event_id = EventId::new();
            ids.push(event_id);
            registry.record_participation(
                &id,
                ParticipationEntry {
                    event_id,
                    event_type: EventType::ResearchSurge,
                    intensity: 0.5,
                    participant: true,
                    at: t0(),
                },
                10,
            );
        }

        let history = registry.participation_history(&id);
        assert_eq!(history.len(), 10);
        assert_eq!(history.first().map(|e| e.event_id), ids.get(2).copied());
    }

    #[test]
    fn history_survives_reingest() {
        let registry = MetricsRegistry::new();
        let id = AgentId::from("oracle");
        registry.ingest(id.clone(), MetricMap::new(), t0());
        registry.record_participation(
            &id,
            ParticipationEntry {
                event_id: EventId::new(),
                event_type: EventType::EnergyCrisis,
                intensity: 0.2,
                participant: false,
                at: t0(),
            },
            10,
        );
        registry.ingest(id.clone(), MetricMap::new(), t0());
        assert_eq!(registry.participation_history(&id).len(), 1);
    }
}
