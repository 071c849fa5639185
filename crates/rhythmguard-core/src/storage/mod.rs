mod config;
pub mod database;
pub mod migrations;

pub use config::{Config, GateConfig, SchedulerConfig, ServerConfig};
pub use database::{AppStateRecord, ClaimOutcome, Database, NewSession};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/rhythmguard[-dev]/` based on RHYTHMGUARD_ENV.
///
/// Set RHYTHMGUARD_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("RHYTHMGUARD_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("rhythmguard-dev")
    } else {
        base_dir.join("rhythmguard")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
