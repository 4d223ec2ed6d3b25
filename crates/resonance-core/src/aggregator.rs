//! Global state aggregation.
//!
//! [`recompute`] derives every collective indicator from one registry
//! snapshot. It is a pure function: the same snapshot always yields the same
//! [`GlobalState`], and nothing carries over from previous ticks.
//!
//! Missing metrics fall back to the defaults in [`resonance_types::keys`]:
//! energy 50, creativity 0.5, performance 0.5, activity label `"unknown"`,
//! and 0 for every counter.

use std::collections::{BTreeMap, BTreeSet};

use resonance_types::{GlobalState, MetricMap, keys};

use crate::registry::RegistrySnapshot;

/// Conflict total at which the conflict factor of harmony reaches zero.
const CONFLICT_SATURATION: f64 = 10.0;

/// State-change total at which the churn factor of turbulence saturates.
const STATE_CHANGE_SATURATION: f64 = 5.0;

/// Error total at which the error factor of turbulence saturates.
const ERROR_SATURATION: f64 = 3.0;

/// Recompute the collective indicators from a registry snapshot.
///
/// With no online agents the result is [`GlobalState::default`].
pub fn recompute(snapshot: &RegistrySnapshot) -> GlobalState {
    let agents: Vec<&MetricMap> = snapshot.online.values().collect();
    if agents.is_empty() {
        return GlobalState::default();
    }

    let energies = numbers(&agents, keys::ENERGY, keys::ENERGY_DEFAULT);
    let creativities = numbers(&agents, keys::CREATIVITY, keys::CREATIVITY_DEFAULT);
    let (resonant_themes, collective_focus) = themes(&agents);

    GlobalState {
        collective_energy: mean(&energies).clamp(0.0, 100.0),
        synchronization_level: synchronization(&agents),
        emergent_creativity: mean(&creativities).clamp(0.0, 1.0),
        systemic_harmony: harmony(&agents),
        cognitive_turbulence: turbulence(&agents, &energies),
        resonant_themes,
        collective_focus,
        online_agents: snapshot.online_ids(),
    }
}

/// Read one numeric metric from every agent, substituting `default`.
fn numbers(agents: &[&MetricMap], key: &str, default: f64) -> Vec<f64> {
    agents.iter().map(|m| m.number_or(key, default)).collect()
}

/// Sum one counter metric across agents (missing counts as zero).
fn sum(agents: &[&MetricMap], key: &str) -> f64 {
    agents.iter().map(|m| m.number_or(key, 0.0)).sum()
}

/// Arithmetic mean; zero for an empty slice.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// `max - min` of a slice; zero for an empty slice.
fn spread(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    if max.is_finite() && min.is_finite() {
        max - min
    } else {
        0.0
    }
}

/// 1 when every agent shares one activity label, otherwise
/// `1 - distinct / count`.
#[allow(clippy::cast_precision_loss)]
fn synchronization(agents: &[&MetricMap]) -> f64 {
    let labels: BTreeSet<&str> = agents
        .iter()
        .map(|m| {
            m.text(keys::ACTIVITY_LABEL)
                .unwrap_or(keys::ACTIVITY_LABEL_DEFAULT)
        })
        .collect();
    if labels.len() <= 1 {
        return 1.0;
    }
    (1.0 - labels.len() as f64 / agents.len() as f64).clamp(0.0, 1.0)
}

/// Equal-weight mean of performance level, performance uniformity, and
/// absence of conflict.
fn harmony(agents: &[&MetricMap]) -> f64 {
    let performances = numbers(agents, keys::PERFORMANCE, keys::PERFORMANCE_DEFAULT);
    let level = mean(&performances).clamp(0.0, 1.0);
    let uniformity = (1.0 - spread(&performances)).clamp(0.0, 1.0);
    let calm = (1.0 - sum(agents, keys::CONFLICTS) / CONFLICT_SATURATION).clamp(0.0, 1.0);
    ((level + uniformity + calm) / 3.0).clamp(0.0, 1.0)
}

/// Equal-weight mean of energy spread, state churn, and error load.
fn turbulence(agents: &[&MetricMap], energies: &[f64]) -> f64 {
    let energy_spread = (spread(energies) / 100.0).clamp(0.0, 1.0);
    let churn = (sum(agents, keys::STATE_CHANGES) / STATE_CHANGE_SATURATION).clamp(0.0, 1.0);
    let errors = (sum(agents, keys::ERRORS) / ERROR_SATURATION).clamp(0.0, 1.0);
    ((energy_spread + churn + errors) / 3.0).clamp(0.0, 1.0)
}

/// Resonant themes (held by two or more agents) and the collective focus
/// (the most frequent theme, if held by at least half the agents).
///
/// Ties for focus go to the lexicographically smallest theme.
fn themes(agents: &[&MetricMap]) -> (BTreeSet<String>, Option<String>) {
    let mut frequency: BTreeMap<String, usize> = BTreeMap::new();
    for agent in agents {
        for theme in agent.tags(keys::ACTIVE_THEMES) {
            let slot = frequency.entry(theme).or_insert(0);
            *slot = slot.saturating_add(1);
        }
    }

    let resonant = frequency
        .iter()
        .filter(|(_, count)| **count >= 2)
        .map(|(theme, _)| theme.clone())
        .collect();

    let mut best: Option<(&String, usize)> = None;
    for (theme, count) in &frequency {
        if best.is_none_or(|(_, best_count)| *count > best_count) {
            best = Some((theme, *count));
        }
    }
    let quorum = agents.len().div_ceil(2);
    let focus = best
        .filter(|(_, count)| *count >= quorum)
        .map(|(theme, _)| theme.clone());

    (resonant, focus)
}
