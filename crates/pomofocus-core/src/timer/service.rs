//! Async driver for [`TimerEngine`].
//!
//! A single actor task owns the engine and its one-second ticker. Commands
//! arrive over a channel and are handled one at a time, so each transition is
//! atomic for every observer. The ticker only exists while the engine is
//! running; it is dropped inside the actor whenever a command or an expiry
//! stops the countdown, and commands are always polled before ticks. A tick
//! scheduled for a countdown that has since been paused, reset or switched can
//! therefore never reach the engine.
//!
//! Settings saves and session appends go to a writer task that runs them in
//! order on the blocking pool. The actor never waits for storage.

use std::ops::ControlFlow;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::config::{TimerConfig, TimerConfigPatch};
use super::engine::{TimerEngine, TimerState};
use super::phase::Phase;
use crate::error::{CoreError, Result, ValidationError};
use crate::events::{Event, PendingSession};
use crate::storage::{SessionLog, SettingsStore};

/// Countdown granularity.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;

enum Command {
    Start(oneshot::Sender<TimerState>),
    Pause(oneshot::Sender<TimerState>),
    Toggle(oneshot::Sender<TimerState>),
    Reset(oneshot::Sender<TimerState>),
    SwitchMode(Phase, oneshot::Sender<TimerState>),
    UpdateConfig(
        TimerConfigPatch,
        oneshot::Sender<Result<TimerConfig, ValidationError>>,
    ),
    Config(oneshot::Sender<TimerConfig>),
    Shutdown(oneshot::Sender<()>),
}

enum Persist {
    Session(PendingSession),
    Config(TimerConfig),
}

/// Cloneable front door to a running timer.
#[derive(Clone)]
pub struct TimerHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<TimerState>,
    events: broadcast::Sender<Event>,
}

pub struct TimerService;

impl TimerService {
    /// Load the stored policy and start the timer task, idle in the Work phase.
    ///
    /// Loading never fails: unreadable or invalid settings fall back to the
    /// defaults and are logged.
    pub async fn spawn(
        settings: Arc<dyn SettingsStore>,
        sessions: Arc<dyn SessionLog>,
    ) -> TimerHandle {
        let loader = Arc::clone(&settings);
        let engine = match tokio::task::spawn_blocking(move || TimerEngine::load(loader.as_ref())).await {
            Ok(engine) => engine,
            Err(e) => {
                warn!(error = %e, "settings load task failed, using defaults");
                TimerEngine::new(TimerConfig::default())
            }
        };
        Self::spawn_with(engine, settings, sessions)
    }

    /// Start the timer task around an already constructed engine.
    pub fn spawn_with(
        engine: TimerEngine,
        settings: Arc<dyn SettingsStore>,
        sessions: Arc<dyn SessionLog>,
    ) -> TimerHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(engine.state());
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(run_writer(persist_rx, settings, sessions, event_tx.clone()));

        let actor = TimerActor {
            engine,
            ticker: None,
            state_tx,
            events: event_tx.clone(),
            persist: persist_tx,
        };
        tokio::spawn(actor.run(command_rx, writer));

        TimerHandle {
            commands: command_tx,
            state: state_rx,
            events: event_tx,
        }
    }
}

impl TimerHandle {
    pub async fn start(&self) -> Result<TimerState> {
        self.request(Command::Start).await
    }

    pub async fn pause(&self) -> Result<TimerState> {
        self.request(Command::Pause).await
    }

    pub async fn toggle(&self) -> Result<TimerState> {
        self.request(Command::Toggle).await
    }

    pub async fn reset(&self) -> Result<TimerState> {
        self.request(Command::Reset).await
    }

    pub async fn switch_mode(&self, phase: Phase) -> Result<TimerState> {
        self.request(|reply| Command::SwitchMode(phase, reply)).await
    }

    /// Merge `patch` into the policy and persist the result.
    ///
    /// # Errors
    /// Returns `CoreError::Validation` if the patch is rejected; the previous
    /// policy stays in effect.
    pub async fn update_config(&self, patch: TimerConfigPatch) -> Result<TimerConfig> {
        let result = self
            .request(|reply| Command::UpdateConfig(patch, reply))
            .await?;
        result.map_err(CoreError::from)
    }

    pub async fn config(&self) -> Result<TimerConfig> {
        self.request(Command::Config).await
    }

    /// Latest published state.
    pub fn state(&self) -> TimerState {
        *self.state.borrow()
    }

    /// Receiver that is notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<TimerState> {
        self.state.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Stop the timer task after pending writes have been flushed.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Command::Shutdown).await
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| CoreError::ServiceStopped)?;
        response.await.map_err(|_| CoreError::ServiceStopped)
    }
}

struct TimerActor {
    engine: TimerEngine,
    ticker: Option<Interval>,
    state_tx: watch::Sender<TimerState>,
    events: broadcast::Sender<Event>,
    persist: mpsc::UnboundedSender<Persist>,
}

impl TimerActor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, writer: JoinHandle<()>) {
        let mut shutdown_ack = None;
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if let ControlFlow::Break(ack) = self.handle(command) {
                        shutdown_ack = Some(ack);
                        break;
                    }
                }
                () = next_tick(&mut self.ticker) => self.on_tick(),
            }
        }

        self.ticker = None;
        drop(self.persist);
        if let Err(e) = writer.await {
            warn!(error = %e, "storage writer task failed");
        }
        debug!("timer service stopped");
        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
    }

    /// Apply one command. Breaks with the acknowledgement channel on shutdown.
    fn handle(&mut self, command: Command) -> ControlFlow<oneshot::Sender<()>> {
        match command {
            Command::Start(reply) => {
                let event = self.engine.start();
                self.settle(event);
                let _ = reply.send(self.engine.state());
            }
            Command::Pause(reply) => {
                let event = self.engine.pause();
                self.settle(event);
                let _ = reply.send(self.engine.state());
            }
            Command::Toggle(reply) => {
                let event = self.engine.toggle();
                self.settle(event);
                let _ = reply.send(self.engine.state());
            }
            Command::Reset(reply) => {
                let event = self.engine.reset();
                self.settle(Some(event));
                let _ = reply.send(self.engine.state());
            }
            Command::SwitchMode(phase, reply) => {
                let event = self.engine.switch_mode(phase);
                self.settle(Some(event));
                let _ = reply.send(self.engine.state());
            }
            Command::UpdateConfig(patch, reply) => {
                let result = match self.engine.update_config(&patch) {
                    Ok(event) => {
                        let config = self.engine.config().clone();
                        self.persist(Persist::Config(config.clone()));
                        self.settle(Some(event));
                        Ok(config)
                    }
                    Err(e) => {
                        warn!(error = %e, "rejected timer config update");
                        Err(e)
                    }
                };
                let _ = reply.send(result);
            }
            Command::Config(reply) => {
                let _ = reply.send(self.engine.config().clone());
            }
            Command::Shutdown(ack) => return ControlFlow::Break(ack),
        }
        ControlFlow::Continue(())
    }

    fn on_tick(&mut self) {
        let event = self.engine.tick();
        if let Some(Event::PhaseCompleted { session, .. }) = &event {
            // The finished countdown's schedule ends here; an auto-started
            // phase gets a fresh one from `settle`.
            self.ticker = None;
            if let Some(session) = session {
                self.persist(Persist::Session(session.clone()));
            }
        }
        self.settle(event);
    }

    /// Bring the ticker in line with the engine, then publish.
    fn settle(&mut self, event: Option<Event>) {
        match (self.engine.is_running(), self.ticker.is_some()) {
            (true, false) => {
                let mut interval = time::interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.ticker = Some(interval);
            }
            (false, true) => self.ticker = None,
            _ => {}
        }

        self.state_tx.send_replace(self.engine.state());
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
    }

    fn persist(&self, job: Persist) {
        if self.persist.send(job).is_err() {
            warn!("storage writer is gone, dropping write");
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Run storage writes one after another, off the async executor.
async fn run_writer(
    mut jobs: mpsc::UnboundedReceiver<Persist>,
    settings: Arc<dyn SettingsStore>,
    sessions: Arc<dyn SessionLog>,
    events: broadcast::Sender<Event>,
) {
    while let Some(job) = jobs.recv().await {
        let settings = Arc::clone(&settings);
        let sessions = Arc::clone(&sessions);
        let outcome =
            tokio::task::spawn_blocking(move || job.execute(settings.as_ref(), sessions.as_ref())).await;
        match outcome {
            Ok(Some(event)) => {
                let _ = events.send(event);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "storage write task failed"),
        }
    }
}

impl Persist {
    fn execute(self, settings: &dyn SettingsStore, sessions: &dyn SessionLog) -> Option<Event> {
        match self {
            Persist::Config(config) => match config.save(settings) {
                Ok(()) => {
                    debug!("timer settings saved");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "failed to save timer settings; keeping them for this run only");
                    Some(Event::PersistenceFailed {
                        operation: "save_settings".into(),
                        message: e.to_string(),
                        at: Utc::now(),
                    })
                }
            },
            Persist::Session(session) => match sessions.append(session.duration_min, &session.label) {
                Ok(recorded) => {
                    info!(id = recorded.id, minutes = recorded.duration_min, "work session recorded");
                    Some(Event::SessionRecorded {
                        id: recorded.id,
                        duration_min: recorded.duration_min,
                        at: recorded.completed_at,
                    })
                }
                Err(e) => {
                    warn!(error = %e, minutes = session.duration_min, "failed to record work session");
                    Some(Event::PersistenceFailed {
                        operation: "append_session".into(),
                        message: e.to_string(),
                        at: Utc::now(),
                    })
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatabaseError;
    use crate::storage::{CompletedSession, MemoryStore};
    use crate::timer::config::SETTINGS_KEY;
    use std::sync::Mutex;

    /// Let the actor and timer driver catch up.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance_secs(secs: u64) {
        for _ in 0..secs {
            time::advance(TICK_INTERVAL).await;
            settle().await;
        }
    }

    async fn next_matching(
        events: &mut broadcast::Receiver<Event>,
        pred: impl Fn(&Event) -> bool,
    ) -> Event {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    }

    fn spawn_memory(patch: TimerConfigPatch) -> (TimerHandle, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = TimerEngine::new(TimerConfig::default().merged(&patch).unwrap());
        let handle = TimerService::spawn_with(engine, store.clone(), store.clone());
        (handle, store)
    }

    struct FailingLog;

    impl SessionLog for FailingLog {
        fn append(&self, _duration_min: u32, _label: &str) -> Result<CompletedSession> {
            Err(CoreError::Database(DatabaseError::Locked))
        }
    }

    impl SettingsStore for FailingLog {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(CoreError::Database(DatabaseError::Locked))
        }

        fn put(&self, _key: &str, _value: &str) -> Result<()> {
            Err(CoreError::Database(DatabaseError::Locked))
        }
    }

    /// Session log whose appends block until the test releases them.
    struct GatedLog {
        gate: Mutex<std::sync::mpsc::Receiver<()>>,
        inner: MemoryStore,
    }

    impl SessionLog for GatedLog {
        fn append(&self, duration_min: u32, label: &str) -> Result<CompletedSession> {
            let _ = self.gate.lock().unwrap().recv();
            self.inner.append(duration_min, label)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_loads_stored_settings() {
        let store = Arc::new(MemoryStore::new());
        store.put(SETTINGS_KEY, r#"{"workDuration":50}"#).unwrap();
        let handle = TimerService::spawn(store.clone(), store.clone()).await;
        let state = handle.state();
        assert_eq!(state.remaining_secs, 3000);
        assert!(!state.running);
        assert_eq!(handle.config().await.unwrap().work_minutes, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_survives_unreadable_settings() {
        let failing = Arc::new(FailingLog);
        let handle = TimerService::spawn(failing.clone(), failing).await;
        assert_eq!(handle.state().remaining_secs, 1500);
        assert_eq!(handle.config().await.unwrap(), TimerConfig::default());
    }

    #[tokio::test(start_paused = true)]
    async fn counts_down_once_per_second() {
        let (handle, _) = spawn_memory(TimerConfigPatch::default());
        let state = handle.start().await.unwrap();
        assert!(state.running);
        assert_eq!(state.remaining_secs, 1500);

        advance_secs(3).await;
        assert_eq!(handle.state().remaining_secs, 1497);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_stops_ticks_and_preserves_remaining() {
        let (handle, _) = spawn_memory(TimerConfigPatch::default());
        handle.start().await.unwrap();
        advance_secs(5).await;

        let paused = handle.pause().await.unwrap();
        assert!(!paused.running);
        assert_eq!(paused.remaining_secs, 1495);

        advance_secs(30).await;
        assert_eq!(handle.state(), paused);

        let again = handle.pause().await.unwrap();
        assert_eq!(again, paused);

        handle.toggle().await.unwrap();
        advance_secs(2).await;
        assert_eq!(handle.state().remaining_secs, 1493);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_and_switch_cancel_pending_tick() {
        let (handle, _) = spawn_memory(TimerConfigPatch::default());
        handle.start().await.unwrap();
        advance_secs(10).await;

        let reset = handle.reset().await.unwrap();
        assert_eq!(reset.remaining_secs, 1500);
        assert!(!reset.running);
        advance_secs(3).await;
        assert_eq!(handle.state().remaining_secs, 1500);

        handle.start().await.unwrap();
        advance_secs(1).await;
        let switched = handle.switch_mode(Phase::ShortBreak).await.unwrap();
        assert_eq!(switched.phase, Phase::ShortBreak);
        assert_eq!(switched.remaining_secs, 300);
        assert!(!switched.running);
        advance_secs(3).await;
        assert_eq!(handle.state().remaining_secs, 300);
        assert_eq!(handle.state().completed_work_sessions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn work_expiry_records_session_and_waits() {
        let (handle, store) = spawn_memory(TimerConfigPatch::default().work_minutes(1));
        let mut events = handle.events();
        handle.start().await.unwrap();
        advance_secs(60).await;

        let state = handle.state();
        assert_eq!(state.phase, Phase::ShortBreak);
        assert_eq!(state.remaining_secs, 300);
        assert!(!state.running);
        assert_eq!(state.completed_work_sessions, 1);

        let recorded = next_matching(&mut events, |e| matches!(e, Event::SessionRecorded { .. })).await;
        assert!(matches!(recorded, Event::SessionRecorded { duration_min: 1, .. }));
        let sessions = store.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].label, "Work Session");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_session_write_does_not_delay_auto_started_break() {
        let (release, gate) = std::sync::mpsc::channel();
        let log = Arc::new(GatedLog {
            gate: Mutex::new(gate),
            inner: MemoryStore::new(),
        });
        let settings = Arc::new(MemoryStore::new());
        let engine = TimerEngine::new(
            TimerConfig::default()
                .merged(&TimerConfigPatch::default().work_minutes(1).auto_start_breaks(true))
                .unwrap(),
        );
        let handle = TimerService::spawn_with(engine, settings, log.clone());
        let mut events = handle.events();

        handle.start().await.unwrap();
        advance_secs(60).await;
        let state = handle.state();
        assert_eq!(state.phase, Phase::ShortBreak);
        assert!(state.running);

        advance_secs(3).await;
        assert_eq!(handle.state().remaining_secs, 297);
        assert!(log.inner.sessions().is_empty());

        release.send(()).unwrap();
        next_matching(&mut events, |e| matches!(e, Event::SessionRecorded { .. })).await;
        assert_eq!(log.inner.sessions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_append_is_reported_not_fatal() {
        let settings = Arc::new(MemoryStore::new());
        let engine = TimerEngine::new(
            TimerConfig::default()
                .merged(&TimerConfigPatch::default().work_minutes(1))
                .unwrap(),
        );
        let handle = TimerService::spawn_with(engine, settings, Arc::new(FailingLog));
        let mut events = handle.events();
        handle.start().await.unwrap();
        advance_secs(60).await;

        let failure = next_matching(&mut events, |e| matches!(e, Event::PersistenceFailed { .. })).await;
        assert!(matches!(failure, Event::PersistenceFailed { ref operation, .. } if operation == "append_session"));
        assert_eq!(handle.state().phase, Phase::ShortBreak);
        assert_eq!(handle.state().completed_work_sessions, 1);
        assert!(handle.start().await.unwrap().running);
    }

    #[tokio::test(start_paused = true)]
    async fn update_config_persists_and_respects_running_countdown() {
        let (handle, store) = spawn_memory(TimerConfigPatch::default());

        let config = handle
            .update_config(TimerConfigPatch::default().work_minutes(30))
            .await
            .unwrap();
        assert_eq!(config.work_minutes, 30);
        assert_eq!(handle.state().remaining_secs, 1800);

        handle.start().await.unwrap();
        advance_secs(2).await;
        handle
            .update_config(TimerConfigPatch::default().work_minutes(45))
            .await
            .unwrap();
        let state = handle.state();
        assert!(state.running);
        assert_eq!(state.remaining_secs, 1798);

        handle.shutdown().await.unwrap();
        let stored = TimerConfig::load(store.as_ref());
        assert_eq!(stored.work_minutes, 45);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_update_is_rejected() {
        let (handle, store) = spawn_memory(TimerConfigPatch::default());
        let err = handle
            .update_config(TimerConfigPatch::default().long_break_interval(0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(handle.config().await.unwrap().long_break_interval, 4);

        handle.shutdown().await.unwrap();
        assert!(store.get(SETTINGS_KEY).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn save_failure_keeps_config_in_memory() {
        let failing = Arc::new(FailingLog);
        let engine = TimerEngine::new(TimerConfig::default());
        let handle = TimerService::spawn_with(engine, failing.clone(), failing);
        let mut events = handle.events();

        let config = handle
            .update_config(TimerConfigPatch::default().short_break_minutes(10))
            .await
            .unwrap();
        assert_eq!(config.short_break_minutes, 10);

        let failure = next_matching(&mut events, |e| matches!(e, Event::PersistenceFailed { .. })).await;
        assert!(matches!(failure, Event::PersistenceFailed { ref operation, .. } if operation == "save_settings"));
        assert_eq!(handle.switch_mode(Phase::ShortBreak).await.unwrap().remaining_secs, 600);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_fail_after_shutdown() {
        let (handle, _) = spawn_memory(TimerConfigPatch::default());
        handle.shutdown().await.unwrap();
        assert!(matches!(handle.start().await, Err(CoreError::ServiceStopped)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_while_running_flushes_and_stops_all_handles() {
        let (handle, store) = spawn_memory(
            TimerConfigPatch::default().work_minutes(1).auto_start_breaks(true),
        );
        let other = handle.clone();
        handle.start().await.unwrap();
        advance_secs(60).await;
        assert!(handle.state().running);

        handle.shutdown().await.unwrap();
        assert_eq!(store.sessions().len(), 1);

        let frozen = other.state();
        advance_secs(5).await;
        assert_eq!(other.state(), frozen);
        assert!(matches!(other.pause().await, Err(CoreError::ServiceStopped)));
        assert!(matches!(other.shutdown().await, Err(CoreError::ServiceStopped)));
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_every_tick() {
        let (handle, _) = spawn_memory(TimerConfigPatch::default());
        let mut state = handle.subscribe();
        handle.start().await.unwrap();
        state.borrow_and_update();

        advance_secs(1).await;
        assert!(state.has_changed().unwrap());
        assert_eq!(state.borrow_and_update().remaining_secs, 1499);
    }
}
