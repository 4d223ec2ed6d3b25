//! Persistence for the Resonance orchestrator's aggregate record.
//!
//! Only collective state and lifetime statistics are stored. Active events,
//! history, and per-agent metrics are rebuilt from live telemetry after a
//! restart.
//!
//! # Modules
//!
//! - [`codec`] -- JSON encoding and field-tolerant decoding.
//! - [`error`] -- Store error type.
//! - [`file_store`] -- Atomic file-backed [`JsonFileStore`].
//! - [`writer`] -- [`BackgroundWriter`] that keeps disk I/O off the tick path.
//!
//! [`JsonFileStore`]: file_store::JsonFileStore
//! [`BackgroundWriter`]: writer::BackgroundWriter

pub mod codec;
pub mod error;
pub mod file_store;
pub mod writer;

pub use error::StoreError;
pub use file_store::JsonFileStore;
pub use writer::{BackgroundWriter, WriterStats};
