pub mod config;
pub mod settings;
pub mod stats;
pub mod timer;

use std::sync::Arc;

use pomofocus_core::{Config, Database, MemoryStore, SessionLog, SettingsStore, SqliteStore};
use tracing::warn;

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Open the database named by the app config.
pub fn open_database(config: &Config) -> CliResult<Database> {
    let path = config.database_path()?;
    Ok(Database::open_at(&path)?)
}

/// Stores for the timer. Falls back to memory when the database is unusable so
/// the timer still runs; nothing is persisted in that case.
pub fn open_stores(config: &Config) -> (Arc<dyn SettingsStore>, Arc<dyn SessionLog>) {
    match open_database(config) {
        Ok(db) => {
            let store = Arc::new(SqliteStore::new(db));
            let settings: Arc<dyn SettingsStore> = store.clone();
            let sessions: Arc<dyn SessionLog> = store;
            (settings, sessions)
        }
        Err(e) => {
            warn!(error = %e, "database unavailable, settings and sessions will not be saved");
            let store = Arc::new(MemoryStore::new());
            let settings: Arc<dyn SettingsStore> = store.clone();
            let sessions: Arc<dyn SessionLog> = store;
            (settings, sessions)
        }
    }
}
