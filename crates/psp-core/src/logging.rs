//! Logging setup

use crate::config::DebugConfig;
use crate::error::Result;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Build the filter for a debug config. `RUST_LOG` wins over the configured level.
pub fn filter_for(debug: &DebugConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(debug.log_level.as_filter()))
}

/// Install the global fmt subscriber.
///
/// Calling this twice is harmless; the second subscriber is dropped.
pub fn init(debug: &DebugConfig) -> Result<()> {
    let filter = filter_for(debug);

    let installed = if debug.log_to_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&debug.log_path)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    if installed.is_err() {
        tracing::debug!("Global subscriber already installed, keeping it");
    }

    Ok(())
}
