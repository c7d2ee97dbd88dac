mod config;
pub mod database;
pub mod migrations;
mod store;

pub use config::{Config, LoggingConfig, StorageConfig};
pub use database::{CompletedSession, Database, DayTotal, SessionStats};
pub use store::{MemoryStore, SessionLog, SettingsStore, SqliteStore};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns the pomofocus data directory, creating it if needed.
///
/// `POMOFOCUS_DATA_DIR` wins when set. Otherwise `~/.config/pomofocus`, or
/// `~/.config/pomofocus-dev` when `POMOFOCUS_ENV=dev`.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("POMOFOCUS_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");

            let env = std::env::var("POMOFOCUS_ENV").unwrap_or_else(|_| "production".to_string());

            if env == "dev" {
                base_dir.join("pomofocus-dev")
            } else {
                base_dir.join("pomofocus")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
