//! Event lifecycle: phase advancement, finalization, and history.
//!
//! Phases follow `Gestation -> Manifestation -> Peak -> Decline ->
//! Integration -> Memory`. Progress (`elapsed / planned`) names a target
//! phase; each check moves an event at most one phase toward it. Events
//! whose progress reaches 1, or that step into `Integration`, are finalized
//! in the same check: `ended_at` is stamped, impact metrics are computed, the
//! phase becomes `Memory`, and the event moves into the bounded history.
//!
//! The ledger remembers the instant of its last check, so re-checking
//! without elapsed time never produces a transition.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use resonance_types::{Event, EventId, EventPhase, EventSummary, impact_keys};
use tracing::{debug, info};

/// One phase change observed during a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
    /// The event that moved.
    pub event_id: EventId,
    /// Phase before the check.
    pub from: EventPhase,
    /// Phase after the check.
    pub to: EventPhase,
}

/// Outcome of advancing every active event once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LifecycleReport {
    /// Phase changes, in active-list order.
    pub transitions: Vec<PhaseTransition>,
    /// Events moved into history during this check.
    pub finalized: Vec<EventSummary>,
}

/// Move an event one phase toward the phase its progress implies.
///
/// Returns the transition, if any. Never moves backward and never enters
/// [`EventPhase::Memory`].
pub fn advance(event: &mut Event, now: DateTime<Utc>) -> Option<PhaseTransition> {
    let target = EventPhase::for_progress(event.progress(now));
    let from = event.phase;
    let next = next_phase(from)?;
    if target < next {
        return None;
    }
    event.phase.advance_to(next).then_some(PhaseTransition {
        event_id: event.id,
        from,
        to: next,
    })
}

const fn next_phase(phase: EventPhase) -> Option<EventPhase> {
    match phase {
        EventPhase::Gestation => Some(EventPhase::Manifestation),
        EventPhase::Manifestation => Some(EventPhase::Peak),
        EventPhase::Peak => Some(EventPhase::Decline),
        EventPhase::Decline => Some(EventPhase::Integration),
        EventPhase::Integration | EventPhase::Memory => None,
    }
}

/// Whether an active event is due for finalization.
pub fn is_due(event: &Event, now: DateTime<Utc>) -> bool {
    !event.phase.is_terminal()
        && (event.progress(now) >= 1.0 || event.phase >= EventPhase::Integration)
}

/// Stamp `ended_at`, compute impact metrics, and enter [`EventPhase::Memory`].
#[allow(clippy::cast_precision_loss)]
pub fn finalize(event: &mut Event, now: DateTime<Utc>) {
    let mut impact = BTreeMap::new();
    impact.insert(impact_keys::DURATION_SECONDS.to_owned(), event.elapsed_secs(now));
    impact.insert(
        impact_keys::PARTICIPANT_COUNT.to_owned(),
        event.participants.len() as f64,
    );
    impact.insert(
        impact_keys::AFFECTED_COUNT.to_owned(),
        event.affected.len() as f64,
    );
    impact.insert(
        impact_keys::MEAN_INTENSITY_PER_AGENT.to_owned(),
        event.mean_intensity(),
    );
    event.impact_metrics = impact;
    event.ended_at = Some(now);
    event.phase.advance_to(EventPhase::Memory);
}

/// Active events plus the bounded history of finalized ones.
#[derive(Debug, Clone)]
pub struct EventLedger {
    active: Vec<Event>,
    history: VecDeque<Event>,
    capacity: usize,
    last_check: Option<DateTime<Utc>>,
}

impl EventLedger {
    /// An empty ledger keeping at most `capacity` finalized events.
    pub const fn new(capacity: usize) -> Self {
        Self {
            active: Vec::new(),
            history: VecDeque::new(),
            capacity,
            last_check: None,
        }
    }

    /// Add a freshly triggered event.
    pub fn push_active(&mut self, event: Event) {
        self.active.push(event);
    }

    /// Events currently in their lifecycle.
    pub fn active(&self) -> &[Event] {
        &self.active
    }

    /// Number of active events.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Finalized events, oldest first.
    pub const fn history(&self) -> &VecDeque<Event> {
        &self.history
    }

    /// The `n` most recently finalized events, newest first.
    pub fn recent_history(&self, n: usize) -> impl Iterator<Item = &Event> {
        self.history.iter().rev().take(n)
    }

    /// Advance every active event once and retire the finished ones.
    ///
    /// A check at or before the previous check's instant does nothing.
    pub fn advance_all(&mut self, now: DateTime<Utc>) -> LifecycleReport {
        let mut report = LifecycleReport::default();
        if self.last_check.is_some_and(|last| now <= last) {
            return report;
        }
        self.last_check = Some(now);

        let mut still_active = Vec::with_capacity(self.active.len());
        for mut event in self.active.drain(..) {
            if let Some(transition) = advance(&mut event, now) {
                debug!(
                    event_id = %event.id,
                    from = ?transition.from,
                    to = ?transition.to,
                    "Phase transition"
                );
                report.transitions.push(transition);
            }

            if is_due(&event, now) {
                finalize(&mut event, now);
                info!(
                    event_id = %event.id,
                    pattern = %event.pattern_id,
                    duration_secs = event.elapsed_secs(now),
                    "Event finalized"
                );
                report.finalized.push(event.summary(now));
                self.history.push_back(event);
            } else {
                still_active.push(event);
            }
        }
        self.active = still_active;

        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::TimeDelta;
    use resonance_types::{AgentId, EventType, GlobalState, Intensity};

    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(1)
    }

    fn event(planned: u64) -> Event {
        Event {
            id: EventId::new(),
            pattern_id: "research_surge".to_owned(),
            name: "Research Surge".to_owned(),
            event_type: EventType::ResearchSurge,
            intensity: Intensity::Strong,
            phase: EventPhase::Gestation,
            started_at: t0(),
            ended_at: None,
            planned_duration_secs: planned,
            participants: BTreeSet::from([AgentId::from("a")]),
            affected: BTreeSet::from([AgentId::from("a"), AgentId::from("b")]),
            epicenter: Some(AgentId::from("a")),
            intensity_per_agent: BTreeMap::from([
                (AgentId::from("a"), 0.9),
                (AgentId::from("b"), 0.5),
            ]),
            applied_effects: BTreeMap::new(),
            impact_metrics: BTreeMap::new(),
            origin_context: GlobalState::default(),
            trigger_probability: 1.0,
        }
    }

    fn phase_of(ledger: &EventLedger) -> Option<EventPhase> {
        ledger.active().first().map(|e| e.phase)
    }

    #[test]
    fn hundred_second_event_walks_its_phases() {
        let mut ledger = EventLedger::new(100);
        ledger.push_active(event(100));

        ledger.advance_all(t0() + TimeDelta::seconds(35));
        assert_eq!(phase_of(&ledger), Some(EventPhase::Manifestation));

        ledger.advance_all(t0() + TimeDelta::seconds(65));
        assert_eq!(phase_of(&ledger), Some(EventPhase::Peak));

        let report = ledger.advance_all(t0() + TimeDelta::seconds(100));
        assert_eq!(ledger.active_count(), 0);
        assert_eq!(report.finalized.len(), 1);

        let done = ledger.history().back();
        assert!(done.is_some());
        if let Some(done) = done {
            assert_eq!(done.phase, EventPhase::Memory);
            let duration = done
                .impact_metrics
                .get(impact_keys::DURATION_SECONDS)
                .copied()
                .unwrap_or_default();
            assert!((duration - 100.0).abs() < 1e-6);
            assert!(done.ended_at.is_some());
        }
    }

    #[test]
    fn check_without_elapsed_time_is_a_noop() {
        let mut ledger = EventLedger::new(10);
        ledger.push_active(event(100));
        let now = t0() + TimeDelta::seconds(50);

        let first = ledger.advance_all(now);
        assert_eq!(first.transitions.len(), 1);
        let second = ledger.advance_all(now);
        assert!(second.transitions.is_empty());
        assert_eq!(phase_of(&ledger), Some(EventPhase::Manifestation));
    }

    #[test]
    fn phases_never_regress() {
        let mut ledger = EventLedger::new(10);
        ledger.push_active(event(1000));
        let mut seen = vec![EventPhase::Gestation];
        for step in 1..=12 {
            ledger.advance_all(t0() + TimeDelta::seconds(step * 90));
            match phase_of(&ledger) {
                Some(phase) => seen.push(phase),
                None => seen.push(EventPhase::Memory),
            }
        }
        assert!(seen.windows(2).all(|w| w.first() <= w.last()));
        assert_eq!(seen.last(), Some(&EventPhase::Memory));
    }

    #[test]
    fn stepping_into_integration_finalizes() {
        let mut e = event(100);
        e.phase = EventPhase::Decline;
        let mut ledger = EventLedger::new(10);
        ledger.push_active(e);

        let report = ledger.advance_all(t0() + TimeDelta::seconds(92));
        assert_eq!(report.transitions.len(), 1);
        assert_eq!(report.finalized.len(), 1);
        assert_eq!(ledger.active_count(), 0);
    }

    #[test]
    fn impact_metrics_are_complete() {
        let mut e = event(60);
        finalize(&mut e, t0() + TimeDelta::seconds(60));
        let get = |k: &str| e.impact_metrics.get(k).copied().unwrap_or(f64::NAN);
        assert!((get(impact_keys::PARTICIPANT_COUNT) - 1.0).abs() < 1e-9);
        assert!((get(impact_keys::AFFECTED_COUNT) - 2.0).abs() < 1e-9);
        assert!((get(impact_keys::MEAN_INTENSITY_PER_AGENT) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn history_is_bounded_and_newest_first() {
        let mut ledger = EventLedger::new(3);
        let mut ids = Vec::new();
        for _ in 0..5 {
            let e = event(10);
            ids.push(e.id);
            ledger.push_active(e);
        }
        ledger.advance_all(t0() + TimeDelta::seconds(10));
        assert_eq!(ledger.history().len(), 3);

        let recent: Vec<EventId> = ledger.recent_history(2).map(|e| e.id).collect();
        let expected: Vec<EventId> = ids.iter().rev().take(2).copied().collect();
        assert_eq!(recent, expected);
    }
}
