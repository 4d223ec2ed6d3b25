//! Shared type definitions for the Resonance global event orchestrator.
//!
//! This crate is the single source of truth for the data model used across
//! the workspace. Status-facing types flow to `TypeScript` via `ts-rs` for
//! display layers.
//!
//! # Modules
//!
//! - [`ids`] -- Agent and event identifiers
//! - [`enums`] -- Event types, intensities, lifecycle phases, scalar names
//! - [`metrics`] -- Agent telemetry values and well-known metric keys
//! - [`structs`] -- Global state, events, statistics, status and persisted records

pub mod enums;
pub mod ids;
pub mod metrics;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{EventPhase, EventType, GlobalScalar, Intensity};
pub use ids::{AgentId, EventId};
pub use metrics::{MetricMap, MetricValue, keys};
pub use structs::{
    Event, EventSummary, GlobalState, GlobalStateSummary, ParticipationEntry, PersistedState,
    Statistics, StatusReport, impact_keys,
};
