//! Detection, triggering, lifecycle, and feedback for the Resonance global
//! event orchestrator.
//!
//! This crate owns the tick pipeline: snapshot the metrics registry,
//! recompute collective state, match patterns, trigger events, propagate
//! their effects, and advance the events already in flight.
//!
//! # Modules
//!
//! - [`aggregator`] -- Collective indicators computed from a registry snapshot.
//! - [`clock`] -- Injected time source with a manual variant for tests.
//! - [`config`] -- Configuration loading from `resonance-config.yaml`.
//! - [`effects`] -- Per-agent intensities and effect deltas, plus the
//!   [`EffectSink`] callback.
//! - [`lifecycle`] -- Phase advancement, finalization, and bounded history.
//! - [`orchestrator`] -- The [`Orchestrator`] context that ties the phases
//!   together.
//! - [`pattern`] -- Pattern definitions, predicates, and the built-in
//!   catalogue.
//! - [`registry`] -- Latest telemetry per agent with staleness tracking.
//! - [`runner`] -- Async periodic tick driver.
//! - [`trigger`] -- Trigger probability, participant selection, and event
//!   instantiation.
//!
//! [`EffectSink`]: effects::EffectSink
//! [`Orchestrator`]: orchestrator::Orchestrator

pub mod aggregator;
pub mod clock;
pub mod config;
pub mod effects;
pub mod lifecycle;
pub mod orchestrator;
pub mod pattern;
pub mod registry;
pub mod runner;
pub mod trigger;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig, OrchestratorConfig};
pub use effects::EffectSink;
pub use orchestrator::{Orchestrator, TickReport};
pub use pattern::{PatternDefinition, PatternError, PatternRegistry};
pub use runner::{NoOpCallback, RunSummary, TickCallback, run_detection_loop};
