//! Timer policy: phase durations, long-break cadence and auto-start flags.
//!
//! A [`TimerConfig`] is an immutable snapshot. Changes go through a
//! [`TimerConfigPatch`], which is validated as a whole and produces a new
//! snapshot; an invalid patch leaves the previous snapshot in place.
//!
//! The snapshot is stored as JSON under [`SETTINGS_KEY`]. Keys missing from the
//! stored value fall back to their defaults, so values written before a field
//! existed still load.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::phase::Phase;
use crate::error::{Result, ValidationError};
use crate::storage::SettingsStore;

/// Settings key the timer policy is stored under.
pub const SETTINGS_KEY: &str = "pomodoro_settings";

/// Upper bound for any single phase, in minutes.
pub const MAX_PHASE_MINUTES: u32 = 24 * 60;

const FIELDS: [&str; 6] = [
    "work_minutes",
    "short_break_minutes",
    "long_break_minutes",
    "long_break_interval",
    "auto_start_breaks",
    "auto_start_work",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfig {
    #[serde(rename = "workDuration")]
    pub work_minutes: u32,
    #[serde(rename = "shortBreakDuration")]
    pub short_break_minutes: u32,
    #[serde(rename = "longBreakDuration")]
    pub long_break_minutes: u32,
    /// Completed work phases between consecutive long breaks. Always >= 1.
    #[serde(rename = "longBreakInterval")]
    pub long_break_interval: u32,
    #[serde(rename = "autoStartBreaks")]
    pub auto_start_breaks: bool,
    #[serde(rename = "autoStartPomodoros")]
    pub auto_start_work: bool,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            work_minutes: 25,
            short_break_minutes: 5,
            long_break_minutes: 15,
            long_break_interval: 4,
            auto_start_breaks: false,
            auto_start_work: false,
        }
    }
}

impl TimerConfig {
    /// Configured length of `phase` in minutes.
    pub fn phase_minutes(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Work => self.work_minutes,
            Phase::ShortBreak => self.short_break_minutes,
            Phase::LongBreak => self.long_break_minutes,
        }
    }

    /// Configured length of `phase` in seconds.
    pub fn phase_secs(&self, phase: Phase) -> u64 {
        u64::from(self.phase_minutes(phase)).saturating_mul(60)
    }

    /// Break that follows the `completed`-th finished work phase.
    pub fn break_after(&self, completed: u64) -> Phase {
        let interval = u64::from(self.long_break_interval.max(1));
        if completed > 0 && completed % interval == 0 {
            Phase::LongBreak
        } else {
            Phase::ShortBreak
        }
    }

    /// Whether the phase entered after an expiry starts counting on its own.
    pub fn auto_starts(&self, next: Phase) -> bool {
        if next.is_break() {
            self.auto_start_breaks
        } else {
            self.auto_start_work
        }
    }

    /// Produce a new snapshot with `patch` applied.
    ///
    /// # Errors
    /// Returns the first invalid field; `self` is never modified.
    pub fn merged(&self, patch: &TimerConfigPatch) -> Result<Self, ValidationError> {
        let next = Self {
            work_minutes: patch.work_minutes.unwrap_or(self.work_minutes),
            short_break_minutes: patch.short_break_minutes.unwrap_or(self.short_break_minutes),
            long_break_minutes: patch.long_break_minutes.unwrap_or(self.long_break_minutes),
            long_break_interval: patch.long_break_interval.unwrap_or(self.long_break_interval),
            auto_start_breaks: patch.auto_start_breaks.unwrap_or(self.auto_start_breaks),
            auto_start_work: patch.auto_start_work.unwrap_or(self.auto_start_work),
        };
        next.validate()?;
        Ok(next)
    }

    /// # Errors
    /// Returns an error naming the first out-of-range field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, minutes) in [
            ("work_minutes", self.work_minutes),
            ("short_break_minutes", self.short_break_minutes),
            ("long_break_minutes", self.long_break_minutes),
        ] {
            if minutes == 0 || minutes > MAX_PHASE_MINUTES {
                return Err(ValidationError::invalid(
                    field,
                    format!("must be between 1 and {MAX_PHASE_MINUTES} minutes, got {minutes}"),
                ));
            }
        }
        if self.long_break_interval == 0 {
            return Err(ValidationError::invalid(
                "long_break_interval",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Names accepted by [`TimerConfig::get`] and [`TimerConfigPatch::from_key_value`].
    pub fn keys() -> &'static [&'static str] {
        &FIELDS
    }

    /// Get a field as a string by its snake_case name.
    pub fn get(&self, key: &str) -> Option<String> {
        let value = match normalize_key(key)? {
            "work_minutes" => self.work_minutes.to_string(),
            "short_break_minutes" => self.short_break_minutes.to_string(),
            "long_break_minutes" => self.long_break_minutes.to_string(),
            "long_break_interval" => self.long_break_interval.to_string(),
            "auto_start_breaks" => self.auto_start_breaks.to_string(),
            "auto_start_work" => self.auto_start_work.to_string(),
            _ => return None,
        };
        Some(value)
    }

    /// Read the stored policy, falling back to defaults.
    ///
    /// Absence is normal on first run. A read failure, a malformed value or an
    /// out-of-range stored value is logged and also yields the defaults: the
    /// timer has to stay usable without working storage.
    pub fn load(store: &dyn SettingsStore) -> Self {
        let raw = match store.get(SETTINGS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("no stored timer settings, using defaults");
                return Self::default();
            }
            Err(e) => {
                warn!(error = %e, "failed to read timer settings, using defaults");
                return Self::default();
            }
        };

        let patch: TimerConfigPatch = match serde_json::from_str(&raw) {
            Ok(patch) => patch,
            Err(e) => {
                warn!(error = %e, "stored timer settings are malformed, using defaults");
                return Self::default();
            }
        };

        Self::default().merged(&patch).unwrap_or_else(|e| {
            warn!(error = %e, "stored timer settings are invalid, using defaults");
            Self::default()
        })
    }

    /// Persist the snapshot under [`SETTINGS_KEY`].
    ///
    /// # Errors
    /// Returns an error if serialization or the store write fails.
    pub fn save(&self, store: &dyn SettingsStore) -> Result<()> {
        let json = serde_json::to_string(self)?;
        store.put(SETTINGS_KEY, &json)
    }
}

/// A partial update to [`TimerConfig`]. `None` fields keep their current value.
///
/// Deserializes from the same JSON shape as the stored config, so a stored value
/// with missing keys is simply a patch over the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfigPatch {
    #[serde(rename = "workDuration", skip_serializing_if = "Option::is_none")]
    pub work_minutes: Option<u32>,
    #[serde(rename = "shortBreakDuration", skip_serializing_if = "Option::is_none")]
    pub short_break_minutes: Option<u32>,
    #[serde(rename = "longBreakDuration", skip_serializing_if = "Option::is_none")]
    pub long_break_minutes: Option<u32>,
    #[serde(rename = "longBreakInterval", skip_serializing_if = "Option::is_none")]
    pub long_break_interval: Option<u32>,
    #[serde(rename = "autoStartBreaks", skip_serializing_if = "Option::is_none")]
    pub auto_start_breaks: Option<bool>,
    #[serde(rename = "autoStartPomodoros", skip_serializing_if = "Option::is_none")]
    pub auto_start_work: Option<bool>,
}

impl TimerConfigPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn work_minutes(mut self, minutes: u32) -> Self {
        self.work_minutes = Some(minutes);
        self
    }

    pub fn short_break_minutes(mut self, minutes: u32) -> Self {
        self.short_break_minutes = Some(minutes);
        self
    }

    pub fn long_break_minutes(mut self, minutes: u32) -> Self {
        self.long_break_minutes = Some(minutes);
        self
    }

    pub fn long_break_interval(mut self, interval: u32) -> Self {
        self.long_break_interval = Some(interval);
        self
    }

    pub fn auto_start_breaks(mut self, enabled: bool) -> Self {
        self.auto_start_breaks = Some(enabled);
        self
    }

    pub fn auto_start_work(mut self, enabled: bool) -> Self {
        self.auto_start_work = Some(enabled);
        self
    }

    /// Build a single-field patch from a textual key and value.
    ///
    /// # Errors
    /// Returns an error for unknown keys or values that don't parse as the
    /// field's type. Range checks happen later, in [`TimerConfig::merged`].
    pub fn from_key_value(key: &str, value: &str) -> Result<Self, ValidationError> {
        let field = normalize_key(key).ok_or_else(|| ValidationError::UnknownField(key.to_string()))?;
        let patch = Self::default();
        let patch = match field {
            "work_minutes" => patch.work_minutes(parse_u32(field, value)?),
            "short_break_minutes" => patch.short_break_minutes(parse_u32(field, value)?),
            "long_break_minutes" => patch.long_break_minutes(parse_u32(field, value)?),
            "long_break_interval" => patch.long_break_interval(parse_u32(field, value)?),
            "auto_start_breaks" => patch.auto_start_breaks(parse_bool(field, value)?),
            "auto_start_work" => patch.auto_start_work(parse_bool(field, value)?),
            _ => return Err(ValidationError::UnknownField(key.to_string())),
        };
        Ok(patch)
    }
}

/// Map snake_case names and the stored JSON names onto the canonical field name.
fn normalize_key(key: &str) -> Option<&'static str> {
    let field = match key {
        "work_minutes" | "workDuration" => "work_minutes",
        "short_break_minutes" | "shortBreakDuration" => "short_break_minutes",
        "long_break_minutes" | "longBreakDuration" => "long_break_minutes",
        "long_break_interval" | "longBreakInterval" => "long_break_interval",
        "auto_start_breaks" | "autoStartBreaks" => "auto_start_breaks",
        "auto_start_work" | "autoStartPomodoros" => "auto_start_work",
        _ => return None,
    };
    Some(field)
}

fn parse_u32(field: &str, value: &str) -> Result<u32, ValidationError> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|_| ValidationError::invalid(field, format!("'{value}' is not a non-negative integer")))
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ValidationError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(ValidationError::invalid(field, format!("'{value}' is not a boolean"))),
    }
}
