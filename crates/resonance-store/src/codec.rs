//! Encoding and field-tolerant decoding of the persisted document.
//!
//! # Document shape
//!
//! ```text
//! {
//!   "global_state": { collective_energy, synchronization_level,
//!                     emergent_creativity, systemic_harmony,
//!                     cognitive_turbulence, resonant_themes,
//!                     collective_focus, online_count },
//!   "statistics":   { events_detected, events_completed,
//!                     participation_total, events_by_type },
//!   "last_updated": RFC 3339 timestamp
//! }
//! ```
//!
//! Decoding never rejects a document for one bad field. Each field that is
//! missing or unparseable falls back to its default, the rest of the record
//! loads normally, and the defaulted field names are reported back.
//! `events_by_type` entries naming an unknown event type are dropped.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use resonance_types::{EventType, GlobalStateSummary, PersistedState, Statistics};
use serde_json::{Map, Value};

use crate::error::StoreError;

/// A decoded record plus the dotted paths of fields that were defaulted.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// The recovered record.
    pub state: PersistedState,
    /// Fields that were missing or unparseable, e.g. `statistics.events_detected`.
    pub defaulted: Vec<String>,
}

/// Serialize the record as pretty-printed JSON.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] if serialization fails.
pub fn encode(state: &PersistedState) -> Result<String, StoreError> {
    Ok(serde_json::to_string_pretty(state)?)
}

/// Parse a document, defaulting any field that cannot be read.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] if the text is not JSON, or
/// [`StoreError::NotAnObject`] if the top level is not an object.
pub fn decode(text: &str) -> Result<Decoded, StoreError> {
    let value: Value = serde_json::from_str(text)?;
    let root = value.as_object().ok_or(StoreError::NotAnObject)?;

    let mut reader = FieldReader::default();
    let fallback = PersistedState::default();

    let empty = Map::new();
    let global = reader.section(root, "global_state").unwrap_or(&empty);
    let defaults = &fallback.global_state;
    let global_state = GlobalStateSummary {
        collective_energy: reader.float(global, "global_state", "collective_energy", defaults.collective_energy),
        synchronization_level: reader.float(
            global,
            "global_state",
            "synchronization_level",
            defaults.synchronization_level,
        ),
        emergent_creativity: reader.float(
            global,
            "global_state",
            "emergent_creativity",
            defaults.emergent_creativity,
        ),
        systemic_harmony: reader.float(global, "global_state", "systemic_harmony", defaults.systemic_harmony),
        cognitive_turbulence: reader.float(
            global,
            "global_state",
            "cognitive_turbulence",
            defaults.cognitive_turbulence,
        ),
        resonant_themes: reader.themes(global),
        collective_focus: reader.focus(global),
        online_count: reader.count_u32(global, "global_state", "online_count"),
    };

    let stats = reader.section(root, "statistics").unwrap_or(&empty);
    let statistics = Statistics {
        events_detected: reader.counter(stats, "statistics", "events_detected"),
        events_completed: reader.counter(stats, "statistics", "events_completed"),
        participation_total: reader.counter(stats, "statistics", "participation_total"),
        events_by_type: reader.events_by_type(stats),
    };

    let last_updated = reader.timestamp(root, fallback.last_updated);

    Ok(Decoded {
        state: PersistedState {
            global_state,
            statistics,
            last_updated,
        },
        defaulted: reader.defaulted,
    })
}

/// Reads individual fields, remembering which ones fell back to defaults.
#[derive(Default)]
struct FieldReader {
    defaulted: Vec<String>,
}

impl FieldReader {
    fn miss(&mut self, section: &str, field: &str) {
        self.defaulted.push(format!("{section}.{field}"));
    }

    fn section<'a>(&mut self, root: &'a Map<String, Value>, name: &str) -> Option<&'a Map<String, Value>> {
        let section = root.get(name).and_then(Value::as_object);
        if section.is_none() {
            self.defaulted.push(name.to_owned());
        }
        section
    }

    fn float(&mut self, obj: &Map<String, Value>, section: &str, field: &str, default: f64) -> f64 {
        match obj.get(field).and_then(Value::as_f64) {
            Some(v) if v.is_finite() => v,
            _ => {
                self.miss(section, field);
                default
            }
        }
    }

    fn counter(&mut self, obj: &Map<String, Value>, section: &str, field: &str) -> u64 {
        obj.get(field).and_then(Value::as_u64).unwrap_or_else(|| {
            self.miss(section, field);
            0
        })
    }

    fn count_u32(&mut self, obj: &Map<String, Value>, section: &str, field: &str) -> u32 {
        let raw = self.counter(obj, section, field);
        u32::try_from(raw).unwrap_or(u32::MAX)
    }

    fn themes(&mut self, obj: &Map<String, Value>) -> BTreeSet<String> {
        match obj.get("resonant_themes").and_then(Value::as_array) {
            Some(items) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect(),
            None => {
                self.miss("global_state", "resonant_themes");
                BTreeSet::new()
            }
        }
    }

    fn focus(&mut self, obj: &Map<String, Value>) -> Option<String> {
        match obj.get("collective_focus") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) => None,
            _ => {
                self.miss("global_state", "collective_focus");
                None
            }
        }
    }

    fn events_by_type(&mut self, obj: &Map<String, Value>) -> BTreeMap<String, u64> {
        let Some(entries) = obj.get("events_by_type").and_then(Value::as_object) else {
            self.miss("statistics", "events_by_type");
            return BTreeMap::new();
        };
        let mut counts = BTreeMap::new();
        for (name, count) in entries {
            match (EventType::parse(name), count.as_u64()) {
                (Some(event_type), Some(count)) => {
                    counts.insert(event_type.as_str().to_owned(), count);
                }
                _ => self.miss("statistics.events_by_type", name),
            }
        }
        counts
    }

    fn timestamp(&mut self, root: &Map<String, Value>, default: DateTime<Utc>) -> DateTime<Utc> {
        root.get("last_updated")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map_or_else(
                || {
                    self.defaulted.push("last_updated".to_owned());
                    default
                },
                |dt| dt.with_timezone(&Utc),
            )
    }
}
