//! Timer engine implementation.
//!
//! The engine is a second-granularity state machine. It does not use internal
//! threads or clocks: the caller feeds it one `tick()` per elapsed second while
//! it is running (see [`crate::timer::TimerService`]).
//!
//! ## State Transitions
//!
//! ```text
//! Work·Idle ⇄ Work·Running ──expiry──> ShortBreak | LongBreak (Idle or Running)
//! ShortBreak·Running ──expiry──> Work
//! LongBreak·Running  ──expiry──> Work
//! ```
//!
//! `reset` and `switch_mode` are legal from any state and always stop the
//! countdown.
//!
//! ## Usage
//!
//! ```
//! use pomofocus_core::timer::{Phase, TimerConfig, TimerEngine};
//!
//! let mut engine = TimerEngine::new(TimerConfig::default());
//! engine.start();
//! engine.tick();
//! assert_eq!(engine.remaining_secs(), 25 * 60 - 1);
//! assert_eq!(engine.phase(), Phase::Work);
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::{TimerConfig, TimerConfigPatch};
use super::phase::Phase;
use crate::error::ValidationError;
use crate::events::{Event, PendingSession};
use crate::storage::SettingsStore;

/// Label written to the session log for finished work phases.
pub const WORK_SESSION_LABEL: &str = "Work Session";

/// Read-only view of the timer handed to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub phase: Phase,
    pub remaining_secs: u64,
    /// Length of the countdown currently loaded.
    pub total_secs: u64,
    pub running: bool,
    /// Work phases finished since the process started.
    pub completed_work_sessions: u64,
}

impl TimerState {
    /// 0.0 .. 1.0 progress within the current phase.
    pub fn progress(&self) -> f64 {
        if self.total_secs == 0 {
            return 0.0;
        }
        1.0 - (self.remaining_secs as f64 / self.total_secs as f64)
    }
}

/// Core timer engine.
#[derive(Debug, Clone)]
pub struct TimerEngine {
    config: TimerConfig,
    phase: Phase,
    remaining_secs: u64,
    /// Length the current countdown was loaded with. Differs from the
    /// configured length only while a countdown started under an older config
    /// is still running.
    total_secs: u64,
    running: bool,
    completed_work_sessions: u64,
}

impl TimerEngine {
    /// Create an idle engine in the Work phase with a full countdown.
    pub fn new(config: TimerConfig) -> Self {
        let total_secs = config.phase_secs(Phase::Work);
        Self {
            config,
            phase: Phase::Work,
            remaining_secs: total_secs,
            total_secs,
            running: false,
            completed_work_sessions: 0,
        }
    }

    /// Create an engine from the stored policy, falling back to defaults.
    pub fn load(store: &dyn SettingsStore) -> Self {
        Self::new(TimerConfig::load(store))
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn remaining_secs(&self) -> u64 {
        self.remaining_secs
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn completed_work_sessions(&self) -> u64 {
        self.completed_work_sessions
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    pub fn state(&self) -> TimerState {
        TimerState {
            phase: self.phase,
            remaining_secs: self.remaining_secs,
            total_secs: self.total_secs,
            running: self.running,
            completed_work_sessions: self.completed_work_sessions,
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Begin counting down. No-op when already running or nothing is left.
    pub fn start(&mut self) -> Option<Event> {
        if self.running || self.remaining_secs == 0 {
            return None;
        }
        self.running = true;
        debug!(phase = %self.phase, remaining = self.remaining_secs, "timer started");
        Some(Event::TimerStarted {
            phase: self.phase,
            remaining_secs: self.remaining_secs,
            at: Utc::now(),
        })
    }

    /// Stop counting down, keeping the remaining time. No-op when idle.
    pub fn pause(&mut self) -> Option<Event> {
        if !self.running {
            return None;
        }
        self.running = false;
        debug!(phase = %self.phase, remaining = self.remaining_secs, "timer paused");
        Some(Event::TimerPaused {
            phase: self.phase,
            remaining_secs: self.remaining_secs,
            at: Utc::now(),
        })
    }

    /// Start when idle, pause when running.
    pub fn toggle(&mut self) -> Option<Event> {
        if self.running {
            self.pause()
        } else {
            self.start()
        }
    }

    /// Stop and reload the full duration of the current phase.
    pub fn reset(&mut self) -> Event {
        self.running = false;
        self.load_phase(self.phase);
        debug!(phase = %self.phase, "timer reset");
        Event::TimerReset {
            phase: self.phase,
            remaining_secs: self.remaining_secs,
            at: Utc::now(),
        }
    }

    /// Stop and load the full duration of `phase`.
    pub fn switch_mode(&mut self, phase: Phase) -> Event {
        let from = self.phase;
        self.running = false;
        self.load_phase(phase);
        debug!(%from, to = %phase, "mode switched");
        Event::ModeSwitched {
            from,
            to: phase,
            remaining_secs: self.remaining_secs,
            at: Utc::now(),
        }
    }

    /// Replace the policy with `patch` merged over it.
    ///
    /// An idle timer reloads the current phase with the new duration. A running
    /// countdown is left alone; the new durations apply from the next phase.
    /// A new `long_break_interval` is used from the next work expiry on, against
    /// the running session count.
    ///
    /// # Errors
    /// Returns a validation error and keeps the previous policy if any field is
    /// out of range.
    pub fn update_config(&mut self, patch: &TimerConfigPatch) -> Result<Event, ValidationError> {
        let config = self.config.merged(patch)?;
        self.config = config;
        let applied_now = !self.running;
        if applied_now {
            self.load_phase(self.phase);
        }
        debug!(applied_now, "timer config updated");
        Ok(Event::ConfigUpdated {
            config: self.config.clone(),
            applied_now,
            at: Utc::now(),
        })
    }

    /// Advance the countdown by one second.
    ///
    /// Ignored unless running. When the countdown reaches zero the engine
    /// stops, moves to the next phase with a full countdown, optionally starts
    /// it again, and returns `Event::PhaseCompleted`. All of that happens
    /// within this call, so a running timer is never observed at zero.
    pub fn tick(&mut self) -> Option<Event> {
        if !self.running {
            return None;
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs > 0 {
            return None;
        }
        Some(self.complete_phase())
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn complete_phase(&mut self) -> Event {
        self.running = false;
        let completed = self.phase;

        let (next, session) = if completed == Phase::Work {
            self.completed_work_sessions += 1;
            let session = PendingSession {
                duration_min: self.config.work_minutes,
                label: WORK_SESSION_LABEL.to_string(),
            };
            (self.config.break_after(self.completed_work_sessions), Some(session))
        } else {
            (Phase::Work, None)
        };

        self.load_phase(next);
        let auto_started = self.config.auto_starts(next);
        self.running = auto_started;

        debug!(
            %completed,
            %next,
            auto_started,
            completed_work_sessions = self.completed_work_sessions,
            "phase completed"
        );

        Event::PhaseCompleted {
            completed,
            next,
            completed_work_sessions: self.completed_work_sessions,
            auto_started,
            session,
            at: Utc::now(),
        }
    }

    fn load_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.total_secs = self.config.phase_secs(phase);
        self.remaining_secs = self.total_secs;
    }
}
