//! Agent telemetry: a flat map of named metric values.
//!
//! The orchestrator never validates telemetry. Values are stored exactly as
//! received, and every consumer reads through the typed accessors on
//! [`MetricMap`], which return `None` for absent or mismatched values so the
//! caller can substitute its documented default.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Well-known metric keys and the defaults applied when they are absent.
pub mod keys {
    /// Agent energy, `[0, 100]`.
    pub const ENERGY: &str = "energy";
    /// Default for [`ENERGY`].
    pub const ENERGY_DEFAULT: f64 = 50.0;

    /// Agent creativity, `[0, 1]`.
    pub const CREATIVITY: &str = "creativity";
    /// Default for [`CREATIVITY`].
    pub const CREATIVITY_DEFAULT: f64 = 0.5;

    /// Agent task performance, `[0, 1]`.
    pub const PERFORMANCE: &str = "performance";
    /// Default for [`PERFORMANCE`].
    pub const PERFORMANCE_DEFAULT: f64 = 0.5;

    /// How active the agent currently is, `[0, 1]`.
    pub const ACTIVITY_LEVEL: &str = "activity_level";
    /// Default for [`ACTIVITY_LEVEL`].
    pub const ACTIVITY_LEVEL_DEFAULT: f64 = 0.5;

    /// Free-form label of the agent's current activity.
    pub const ACTIVITY_LABEL: &str = "activity_label";
    /// Default for [`ACTIVITY_LABEL`].
    pub const ACTIVITY_LABEL_DEFAULT: &str = "unknown";

    /// Number of open conflicts, non-negative.
    pub const CONFLICTS: &str = "conflicts";
    /// Number of state changes since the last report, non-negative.
    pub const STATE_CHANGES: &str = "state_changes";
    /// Number of errors since the last report, non-negative.
    pub const ERRORS: &str = "errors";

    /// Whether the agent is busy processing.
    pub const PROCESSING: &str = "processing";

    /// Themes the agent is currently engaged with.
    pub const ACTIVE_THEMES: &str = "active_themes";
}

/// A single telemetry value.
///
/// Untagged on the wire: JSON booleans, numbers, strings, and string arrays
/// map onto the variants in that order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// A boolean flag.
    Flag(bool),
    /// A scalar number (integers are widened).
    Number(f64),
    /// A text label.
    Text(String),
    /// A set of tags.
    Tags(BTreeSet<String>),
}

impl From<bool> for MetricValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<u32> for MetricValue {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<BTreeSet<String>> for MetricValue {
    fn from(value: BTreeSet<String>) -> Self {
        Self::Tags(value)
    }
}

/// The latest telemetry snapshot reported by one agent.
///
/// Unknown keys are preserved as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricMap(pub BTreeMap<String, MetricValue>);

impl MetricMap {
    /// Create an empty metric map.
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<MetricValue>) -> Self {
        self.0.insert(key.to_owned(), value.into());
        self
    }

    /// Insert or replace a value.
    pub fn set(&mut self, key: &str, value: impl Into<MetricValue>) {
        self.0.insert(key.to_owned(), value.into());
    }

    /// Raw access to a value.
    pub fn get(&self, key: &str) -> Option<&MetricValue> {
        self.0.get(key)
    }

    /// Read a finite number. Non-numeric or non-finite values read as absent.
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.0.get(key) {
            Some(MetricValue::Number(n)) if n.is_finite() => Some(*n),
            _ => None,
        }
    }

    /// Read a number, falling back to `default`.
    pub fn number_or(&self, key: &str, default: f64) -> f64 {
        self.number(key).unwrap_or(default)
    }

    /// Read a flag. A number counts as `true` when non-zero.
    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.0.get(key) {
            Some(MetricValue::Flag(b)) => Some(*b),
            Some(MetricValue::Number(n)) => Some(n.abs() > f64::EPSILON),
            _ => None,
        }
    }

    /// Read a text label.
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(MetricValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Read a tag set. A single text value reads as a one-element set.
    pub fn tags(&self, key: &str) -> BTreeSet<String> {
        match self.0.get(key) {
            Some(MetricValue::Tags(tags)) => tags.clone(),
            Some(MetricValue::Text(s)) => BTreeSet::from([s.clone()]),
            _ => BTreeSet::new(),
        }
    }

    /// Number of stored metrics.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no metrics are stored.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, MetricValue)> for MetricMap {
    fn from_iter<I: IntoIterator<Item = (String, MetricValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
