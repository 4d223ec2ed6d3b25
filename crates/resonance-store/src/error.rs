//! Error types for the persistence store.

/// Errors that can occur while saving or loading the aggregate record.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading, writing, or renaming the state file failed.
    #[error("state file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The document could not be serialized, or is not valid JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The document is valid JSON but not an object.
    #[error("persisted document is not a JSON object")]
    NotAnObject,
}
