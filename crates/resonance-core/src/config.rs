//! Configuration loading and typed config structures.
//!
//! The canonical configuration lives in `resonance-config.yaml`. Every field
//! has a default, so an empty file (or no file at all) yields a working
//! orchestrator.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use resonance_types::AgentId;
use serde::Deserialize;

/// Environment variable that overrides [`StoreConfig::path`].
pub const STATE_PATH_ENV: &str = "RESONANCE_STATE_PATH";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration for a hosting process.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// Detection and lifecycle parameters.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Tick scheduling.
    #[serde(default)]
    pub tick: TickConfig,

    /// Aggregate state persistence.
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `RESONANCE_STATE_PATH` overrides `store.path` when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.store.apply_env_overrides();
        Ok(config)
    }
}

/// Detection, triggering, and lifecycle parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrchestratorConfig {
    /// Seconds without an update before an agent counts as offline.
    #[serde(default = "default_staleness_window_secs")]
    pub staleness_window_secs: u64,

    /// Collective energy below which every trigger probability is dampened.
    #[serde(default = "default_energy_floor")]
    pub energy_floor: f64,

    /// Active event count at which every trigger probability is dampened.
    #[serde(default = "default_max_concurrent_events")]
    pub max_concurrent_events: usize,

    /// Finalized events kept in history; oldest are evicted first.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Participation entries kept per agent.
    #[serde(default = "default_participation_history_capacity")]
    pub participation_history_capacity: usize,

    /// Finalized events included in a status report.
    #[serde(default = "default_recent_history_len")]
    pub recent_history_len: usize,

    /// RNG seed for trigger draws. `None` seeds from the OS.
    #[serde(default)]
    pub seed: Option<u64>,

    /// The full agent population. Empty means "every agent ever seen".
    #[serde(default)]
    pub known_agents: Vec<AgentId>,

    /// Per-agent effect sensitivity. Missing agents use 1.0.
    #[serde(default)]
    pub sensitivity: BTreeMap<AgentId, f64>,
}

impl OrchestratorConfig {
    /// The staleness window as a signed time delta.
    pub fn staleness_window(&self) -> TimeDelta {
        let secs = i64::try_from(self.staleness_window_secs).unwrap_or(i64::MAX);
        TimeDelta::try_seconds(secs).unwrap_or(TimeDelta::MAX)
    }

    /// Sensitivity factor for one agent.
    pub fn sensitivity_of(&self, agent_id: &AgentId) -> f64 {
        self.sensitivity.get(agent_id).copied().unwrap_or(1.0)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            staleness_window_secs: default_staleness_window_secs(),
            energy_floor: default_energy_floor(),
            max_concurrent_events: default_max_concurrent_events(),
            history_capacity: default_history_capacity(),
            participation_history_capacity: default_participation_history_capacity(),
            recent_history_len: default_recent_history_len(),
            seed: None,
            known_agents: Vec::new(),
            sensitivity: BTreeMap::new(),
        }
    }
}

/// Tick scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TickConfig {
    /// Real-time milliseconds between ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub interval_ms: u64,
}

impl TickConfig {
    /// The tick interval as a [`Duration`].
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_tick_interval_ms(),
        }
    }
}

/// Aggregate state persistence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Path of the persisted JSON document.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl StoreConfig {
    /// Override the store path from `RESONANCE_STATE_PATH` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(STATE_PATH_ENV) {
            self.path = PathBuf::from(val);
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_staleness_window_secs() -> u64 {
    30 * 60
}

const fn default_energy_floor() -> f64 {
    30.0
}

const fn default_max_concurrent_events() -> usize {
    3
}

const fn default_history_capacity() -> usize {
    100
}

const fn default_participation_history_capacity() -> usize {
    10
}

const fn default_recent_history_len() -> usize {
    5
}

const fn default_tick_interval_ms() -> u64 {
    60_000
}

fn default_store_path() -> PathBuf {
    PathBuf::from("resonance-state.json")
}

fn default_log_level() -> String {
    "info".to_owned()
}
