use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::{Phase, TimerConfig};

/// A work session that finished and still has to be written to the session log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSession {
    pub duration_min: u32,
    pub label: String,
}

/// Every state change in the timer produces an Event.
/// The presentation layer renders them; the service persists what they carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    TimerStarted {
        phase: Phase,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    TimerPaused {
        phase: Phase,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    TimerReset {
        phase: Phase,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    ModeSwitched {
        from: Phase,
        to: Phase,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    /// A countdown reached zero and the timer moved on to `next`.
    PhaseCompleted {
        completed: Phase,
        next: Phase,
        completed_work_sessions: u64,
        auto_started: bool,
        /// Present when a work phase finished.
        session: Option<PendingSession>,
        at: DateTime<Utc>,
    },
    ConfigUpdated {
        config: TimerConfig,
        /// False when a countdown was running and the new durations wait for
        /// the next phase.
        applied_now: bool,
        at: DateTime<Utc>,
    },
    SessionRecorded {
        id: i64,
        duration_min: u32,
        at: DateTime<Utc>,
    },
    /// A settings save or session append failed. The timer carried on.
    PersistenceFailed {
        operation: String,
        message: String,
        at: DateTime<Utc>,
    },
}
