//! Host binary for the Resonance global event orchestrator.
//!
//! Reads agent telemetry as JSON lines on stdin, runs the detection tick
//! loop, and persists the aggregate record after every tick.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `resonance-config.yaml` (or `RESONANCE_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Build the orchestrator with the built-in pattern catalogue
//! 4. Restore the aggregate record from the state file
//! 5. Start telemetry intake and the background writer
//! 6. Run the tick loop until Ctrl-C
//! 7. Flush the final record and stop

mod error;
mod intake;
mod persist_callback;

use std::path::PathBuf;
use std::sync::Arc;

use resonance_core::config::LoggingConfig;
use resonance_core::{EngineConfig, Orchestrator, SystemClock, run_detection_loop};
use resonance_store::{BackgroundWriter, JsonFileStore};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::persist_callback::PersistCallback;

/// Environment variable naming the configuration file.
const CONFIG_PATH_ENV: &str = "RESONANCE_CONFIG";

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "resonance-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if the configuration file is invalid or the shutdown
/// signal cannot be installed.
#[tokio::main]
async fn main() -> Result<(), EngineError> {
    // 1. Load configuration. Logging is not up yet, so remember whether
    //    the file was found and report it afterwards.
    let (config, config_path, found) = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!("resonance-engine starting");
    if found {
        info!(path = %config_path.display(), "Configuration loaded");
    } else {
        info!(path = %config_path.display(), "Config file not found, using defaults");
    }
    info!(
        tick_interval_ms = config.tick.interval_ms,
        staleness_window_secs = config.orchestrator.staleness_window_secs,
        energy_floor = config.orchestrator.energy_floor,
        max_concurrent_events = config.orchestrator.max_concurrent_events,
        state_path = %config.store.path.display(),
        "Orchestrator configuration"
    );

    // 3. Build the orchestrator.
    let orchestrator = Arc::new(Orchestrator::new(
        config.orchestrator.clone(),
        Arc::new(SystemClock),
    ));
    info!(patterns = orchestrator.patterns().len(), "Pattern catalogue registered");

    // 4. Restore aggregate state.
    let store = JsonFileStore::new(config.store.path.clone());
    orchestrator.restore(store.load_or_default().await);

    // 5. Telemetry intake and background persistence.
    let intake = tokio::spawn(intake::ingest_lines(
        intake::spawn_stdin_reader(),
        Arc::clone(&orchestrator),
    ));
    let writer = BackgroundWriter::spawn(store);

    // 6. Run the tick loop until Ctrl-C.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal = async move {
        let result = tokio::signal::ctrl_c().await;
        match &result {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
        }
        let _ = shutdown_tx.send(true);
        result
    };

    let mut callback = PersistCallback::new(&writer);
    let (summary, signal_result) = tokio::join!(
        run_detection_loop(
            Arc::clone(&orchestrator),
            config.tick.interval(),
            shutdown_rx,
            &mut callback,
        ),
        signal
    );

    // 7. Flush and stop.
    intake.abort();
    let stats = writer.shutdown().await;
    let status = orchestrator.status();
    info!(
        total_ticks = summary.total_ticks,
        events_detected = status.statistics.events_detected,
        events_completed = status.statistics.events_completed,
        writes = stats.writes,
        write_failures = stats.failures,
        "resonance-engine shutdown complete"
    );

    signal_result?;
    Ok(())
}

/// Install the tracing subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Load the engine configuration.
///
/// Returns the config, the path consulted, and whether the file existed.
fn load_config() -> Result<(EngineConfig, PathBuf, bool), EngineError> {
    let path = std::env::var_os(CONFIG_PATH_ENV)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        let config = EngineConfig::from_file(&path)?;
        Ok((config, path, true))
    } else {
        let config = EngineConfig::parse("")?;
        Ok((config, path, false))
    }
}
