//! Storage seams consumed by the timer.
//!
//! The timer only needs two narrow capabilities: a key/value settings store and
//! an append-only session log. [`SqliteStore`] provides both on top of
//! [`Database`]; [`MemoryStore`] keeps everything in process memory for tests
//! and for running without a usable database.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use super::database::{CompletedSession, Database};
use crate::error::{CoreError, DatabaseError, Result, ValidationError};

/// Durable key/value persistence with upsert semantics.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
}

/// Durable append-only record of completed work sessions.
pub trait SessionLog: Send + Sync {
    /// Record a session finished now.
    fn append(&self, duration_min: u32, label: &str) -> Result<CompletedSession>;
}

/// [`Database`] behind a mutex, usable from the timer service's blocking pool.
pub struct SqliteStore {
    db: Mutex<Database>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Run `f` with exclusive access to the database.
    ///
    /// # Errors
    /// Returns `DatabaseError::Poisoned` if a previous holder panicked.
    pub fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let db = self.db.lock().map_err(|_| DatabaseError::Poisoned)?;
        f(&db)
    }
}

impl SettingsStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_db(|db| Ok(db.kv_get(key)?))
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.with_db(|db| Ok(db.kv_set(key, value)?))
    }
}

impl SessionLog for SqliteStore {
    fn append(&self, duration_min: u32, label: &str) -> Result<CompletedSession> {
        self.with_db(|db| db.append_session(duration_min, label))
    }
}

#[derive(Default)]
struct MemoryInner {
    settings: HashMap<String, String>,
    sessions: Vec<CompletedSession>,
}

/// Settings and sessions held in memory only.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions appended so far, oldest first.
    pub fn sessions(&self) -> Vec<CompletedSession> {
        self.inner
            .lock()
            .map(|inner| inner.sessions.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| CoreError::Database(DatabaseError::Poisoned))
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.settings.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.settings.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

impl SessionLog for MemoryStore {
    fn append(&self, duration_min: u32, label: &str) -> Result<CompletedSession> {
        if duration_min == 0 {
            return Err(ValidationError::invalid("duration_min", "must be positive").into());
        }
        let mut inner = self.lock()?;
        let session = CompletedSession {
            id: i64::try_from(inner.sessions.len()).unwrap_or(i64::MAX - 1) + 1,
            duration_min,
            label: label.to_string(),
            completed_at: Utc::now(),
        };
        inner.sessions.push(session.clone());
        Ok(session)
    }
}
