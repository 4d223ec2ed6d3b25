//! File-backed store for the aggregate record.
//!
//! Saves write the full document to `<path>.tmp` and rename it over the
//! target, so a crash mid-write never leaves a truncated state file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use resonance_types::PersistedState;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::StoreError;

/// A JSON document on the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// A store backed by the file at `path`. Nothing is touched until the
    /// first save or load.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The state file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Atomically replace the state file with `state`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if encoding fails, or
    /// [`StoreError::Io`] if the write or rename fails.
    pub async fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        let json = codec::encode(state)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, json.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(
            path = %self.path.display(),
            events_detected = state.statistics.events_detected,
            "Aggregate state saved"
        );
        Ok(())
    }

    /// Read the state file. Returns `Ok(None)` if it does not exist.
    ///
    /// Individual unreadable fields are defaulted and logged; see
    /// [`codec::decode`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file exists but cannot be read, or a
    /// decode error if the document is not a JSON object.
    pub async fn load(&self) -> Result<Option<PersistedState>, StoreError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let decoded = codec::decode(&text)?;
        for field in &decoded.defaulted {
            warn!(path = %self.path.display(), field = %field, "Persisted field unreadable, using default");
        }
        Ok(Some(decoded.state))
    }

    /// Load the record, falling back to a fresh default on any failure.
    pub async fn load_or_default(&self) -> PersistedState {
        match self.load().await {
            Ok(Some(state)) => {
                info!(
                    path = %self.path.display(),
                    events_detected = state.statistics.events_detected,
                    "Aggregate state loaded"
                );
                state
            }
            Ok(None) => {
                info!(path = %self.path.display(), "No persisted state, starting fresh");
                PersistedState::default()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to load persisted state, starting fresh");
                PersistedState::default()
            }
        }
    }
}
