//! SQLite-based settings and session storage.
//!
//! Provides persistent storage for:
//! - Completed work sessions (append-only)
//! - Session statistics (today and all-time, per day)
//! - Key-value settings table

use std::path::Path;

use chrono::{DateTime, NaiveDate, SecondsFormat, Timelike, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::data_dir;
use super::migrations;
use crate::error::{CoreError, DatabaseError, ValidationError};

/// A finished work session as stored in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedSession {
    pub id: i64,
    pub duration_min: u32,
    pub label: String,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionStats {
    pub total_sessions: u64,
    pub total_minutes: u64,
    pub today_sessions: u64,
    pub today_minutes: u64,
}

/// Minutes of completed work on one UTC day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayTotal {
    pub date: NaiveDate,
    pub sessions: u64,
    pub minutes: u64,
}

/// SQLite database for settings and session storage.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open the database at `<data_dir>/pomofocus.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the data directory is unavailable or the database
    /// cannot be opened or migrated.
    pub fn open() -> Result<Self, CoreError> {
        let path = data_dir()?.join("pomofocus.db");
        Self::open_at(&path)
    }

    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_at(path: &Path) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, CoreError> {
        migrations::migrate(&conn)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self { conn })
    }

    // ── Settings ─────────────────────────────────────────────────────

    /// Get a value from the settings table.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, rusqlite::Error> {
        let mut stmt = self.conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        let result = stmt.query_row(params![key], |row| row.get::<_, String>(0));
        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Insert or update a value in the settings table.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    // ── Sessions ─────────────────────────────────────────────────────

    /// Record a completed work session stamped with the current time.
    ///
    /// # Errors
    /// Returns an error if `duration_min` is zero or the insert fails.
    pub fn append_session(&self, duration_min: u32, label: &str) -> Result<CompletedSession, CoreError> {
        self.record_session_at(duration_min, label, Utc::now())
    }

    /// Record a completed work session with an explicit timestamp.
    ///
    /// # Errors
    /// Returns an error if `duration_min` is zero or the insert fails.
    pub fn record_session_at(
        &self,
        duration_min: u32,
        label: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<CompletedSession, CoreError> {
        if duration_min == 0 {
            return Err(ValidationError::invalid("duration_min", "must be positive").into());
        }
        // Second precision keeps the stored text sortable and readable by SQLite date functions.
        let completed_at = completed_at.with_nanosecond(0).unwrap_or(completed_at);
        self.conn.execute(
            "INSERT INTO pomodoro_sessions (duration, label, completed_at) VALUES (?1, ?2, ?3)",
            params![
                duration_min,
                label,
                completed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            ],
        )?;
        Ok(CompletedSession {
            id: self.conn.last_insert_rowid(),
            duration_min,
            label: label.to_string(),
            completed_at,
        })
    }

    /// Most recent sessions first.
    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<CompletedSession>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, duration, label, completed_at
             FROM pomodoro_sessions
             ORDER BY completed_at DESC, id DESC
             LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            let (id, duration_min, label, completed_at) = row?;
            let completed_at = DateTime::parse_from_rfc3339(&completed_at)
                .map_err(|e| DatabaseError::QueryFailed(format!("bad completed_at '{completed_at}': {e}")))?
                .with_timezone(&Utc);
            sessions.push(CompletedSession {
                id,
                duration_min,
                label,
                completed_at,
            });
        }
        Ok(sessions)
    }

    /// All-time and today's totals.
    pub fn stats(&self) -> Result<SessionStats, rusqlite::Error> {
        let (total_sessions, total_minutes) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(duration), 0) FROM pomodoro_sessions",
            [],
            |row| Ok((row.get::<_, u64>(0)?, row.get::<_, u64>(1)?)),
        )?;

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let (today_sessions, today_minutes) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(duration), 0)
             FROM pomodoro_sessions
             WHERE substr(completed_at, 1, 10) = ?1",
            params![today],
            |row| Ok((row.get::<_, u64>(0)?, row.get::<_, u64>(1)?)),
        )?;

        Ok(SessionStats {
            total_sessions,
            total_minutes,
            today_sessions,
            today_minutes,
        })
    }

    /// Per-day totals between `from` and `to` inclusive. Days without sessions
    /// are omitted.
    pub fn daily_minutes(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DayTotal>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT substr(completed_at, 1, 10) AS day, COUNT(*), COALESCE(SUM(duration), 0)
             FROM pomodoro_sessions
             WHERE substr(completed_at, 1, 10) BETWEEN ?1 AND ?2
             GROUP BY day
             ORDER BY day",
        )?;
        let rows = stmt.query_map(
            params![from.format("%Y-%m-%d").to_string(), to.format("%Y-%m-%d").to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u64>(1)?,
                    row.get::<_, u64>(2)?,
                ))
            },
        )?;

        let mut days = Vec::new();
        for row in rows {
            let (day, sessions, minutes) = row?;
            let date = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                .map_err(|e| DatabaseError::QueryFailed(format!("bad day '{day}': {e}")))?;
            days.push(DayTotal {
                date,
                sessions,
                minutes,
            });
        }
        Ok(days)
    }
}
