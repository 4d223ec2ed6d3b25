//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that `main` propagates with
//! `?`. Detection itself never fails; only startup and signal handling can.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: resonance_core::ConfigError,
    },

    /// Listening for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}
