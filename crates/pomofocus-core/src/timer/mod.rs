mod config;
mod engine;
mod phase;
mod service;

pub use config::{TimerConfig, TimerConfigPatch, MAX_PHASE_MINUTES, SETTINGS_KEY};
pub use engine::{TimerEngine, TimerState, WORK_SESSION_LABEL};
pub use phase::Phase;
pub use service::{TimerHandle, TimerService, TICK_INTERVAL};
