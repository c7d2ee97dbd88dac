//! # Pomofocus Core Library
//!
//! Core logic for a Pomodoro interval timer: a Work / Short Break / Long Break
//! cycle with user-configurable durations, automatic long-break cadence and
//! optional auto-start between phases.
//!
//! ## Architecture
//!
//! - **Timer Engine**: a synchronous state machine advanced one second at a
//!   time by `tick()`
//! - **Timer Service**: a tokio task that owns the engine, drives the ticks and
//!   hands persistence to a background writer
//! - **Storage**: SQLite settings and session log, plus TOML application config
//!
//! ## Key Components
//!
//! - [`TimerEngine`]: Core timer state machine
//! - [`TimerService`]: Async driver producing a [`TimerHandle`]
//! - [`Database`]: Session and statistics persistence
//! - [`Config`]: Application configuration management

pub mod error;
pub mod events;
pub mod storage;
pub mod timer;

pub use error::{ConfigError, CoreError, DatabaseError, ValidationError};
pub use events::{Event, PendingSession};
pub use storage::{
    CompletedSession, Config, Database, DayTotal, MemoryStore, SessionLog, SessionStats,
    SettingsStore, SqliteStore,
};
pub use timer::{
    Phase, TimerConfig, TimerConfigPatch, TimerEngine, TimerHandle, TimerService, TimerState,
};
