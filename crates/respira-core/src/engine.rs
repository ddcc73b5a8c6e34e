//! Session engine.
//!
//! Composes the [`PhaseSequencer`] and the [`SessionClock`] into the one
//! externally visible state machine:
//!
//! ```text
//! Idle -> Running -> Ended(completed) -> Idle
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let engine = SessionEngine::builder(sink).lead_in(Duration::ZERO).build();
//! engine.select_mode(mode);
//! engine.select_duration(180);
//! engine.start()?;
//! let completed = engine.wait_until_ended().await;
//! ```
//!
//! Natural completion is driven solely by the clock's completion signal.
//! `stop()` and completion both take the engine lock and check the session
//! generation, so exactly one `SessionEnded` is emitted per session. Events
//! and cues go out after the engine lock is released, so a sink may call
//! `stop()` (or any other command) from inside `emit`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::clock::{ClockState, SessionClock};
use crate::collab::{
    fire_cue, CuePreferences, CueSink, NoWakeLock, SilentCues, WakeLock, WakeLockProvider,
};
use crate::error::{CoreError, Result};
use crate::events::{deliver, EmitGate, Event, EventSink};
use crate::mode::{Mode, ModeCatalog};
use crate::sequencer::PhaseSequencer;
use crate::stats::{StatsLedger, StatsRecord};
use crate::storage::{Config, MAX_LEAD_IN_MS};

/// What the caller picks before starting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub mode: Mode,
    pub total_secs: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    Ended { completed: bool },
}

/// Read-only view of the engine's session state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub status: SessionStatus,
    pub session_id: Option<Uuid>,
    pub mode_id: String,
    pub phase_index: usize,
    pub total_secs: u32,
    pub remaining_secs: u32,
    pub elapsed_secs: u32,
}

struct EngineInner {
    status: SessionStatus,
    mode: Mode,
    total_secs: u32,
    session_id: Option<Uuid>,
    generation: u64,
    /// Clock armed for the current session (lead-in elapsed).
    armed: bool,
    wake_lock: Option<WakeLock>,
    task: Option<JoinHandle<()>>,
}

struct Shared {
    inner: Mutex<EngineInner>,
    sequencer: PhaseSequencer,
    clock: SessionClock,
    sink: Arc<dyn EventSink>,
    ledger: StatsLedger,
    wake: Arc<dyn WakeLockProvider>,
    cues: Arc<dyn CueSink>,
    lead_in: Duration,
    gate: Arc<EmitGate>,
    status_tx: watch::Sender<SessionStatus>,
}

pub struct EngineBuilder {
    sink: Arc<dyn EventSink>,
    ledger: Option<StatsLedger>,
    wake: Arc<dyn WakeLockProvider>,
    cues: Arc<dyn CueSink>,
    haptics: bool,
    bell: bool,
    lead_in: Duration,
    mode: Mode,
    total_secs: u32,
}

impl EngineBuilder {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            ledger: None,
            wake: Arc::new(NoWakeLock),
            cues: Arc::new(SilentCues),
            haptics: true,
            bell: true,
            lead_in: Duration::from_millis(1000),
            mode: ModeCatalog::builtin().default_mode().clone(),
            total_secs: 180,
        }
    }

    pub fn ledger(mut self, ledger: StatsLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn wake_lock(mut self, provider: Arc<dyn WakeLockProvider>) -> Self {
        self.wake = provider;
        self
    }

    pub fn cues(mut self, cues: Arc<dyn CueSink>) -> Self {
        self.cues = cues;
        self
    }

    /// Enable or silence phase cues (`haptics`) and the end cue (`bell`).
    pub fn cue_preferences(mut self, haptics: bool, bell: bool) -> Self {
        self.haptics = haptics;
        self.bell = bell;
        self
    }

    /// Clamped to [`MAX_LEAD_IN_MS`].
    pub fn lead_in(mut self, lead_in: Duration) -> Self {
        self.lead_in = lead_in.min(Duration::from_millis(MAX_LEAD_IN_MS));
        self
    }

    pub fn session(mut self, config: SessionConfig) -> Self {
        self.mode = config.mode;
        self.total_secs = config.total_secs;
        self
    }

    /// Lead-in, cue switches and default session from the user's config.
    /// An unknown default mode keeps the built-in default.
    pub fn config(mut self, config: &Config) -> Self {
        self = self
            .lead_in(Duration::from_millis(config.engine.lead_in_ms))
            .cue_preferences(config.cues.haptics, config.cues.bell);
        match config.session_config(None, None) {
            Ok(session) => self.session(session),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring configured session defaults");
                self
            }
        }
    }

    pub fn build(self) -> SessionEngine {
        let (status_tx, _) = watch::channel(SessionStatus::Idle);
        let gate = Arc::new(EmitGate::default());
        let cues: Arc<dyn CueSink> =
            Arc::new(CuePreferences::new(self.cues, self.haptics, self.bell));
        SessionEngine {
            shared: Arc::new(Shared {
                inner: Mutex::new(EngineInner {
                    status: SessionStatus::Idle,
                    mode: self.mode,
                    total_secs: self.total_secs,
                    session_id: None,
                    generation: 0,
                    armed: false,
                    wake_lock: None,
                    task: None,
                }),
                sequencer: PhaseSequencer::with_gate(
                    self.sink.clone(),
                    cues.clone(),
                    gate.clone(),
                ),
                clock: SessionClock::with_gate(self.sink.clone(), gate.clone()),
                sink: self.sink,
                ledger: self.ledger.unwrap_or_else(StatsLedger::in_memory),
                wake: self.wake,
                cues,
                lead_in: self.lead_in,
                gate,
                status_tx,
            }),
        }
    }
}

/// Cheap to clone; clones control the same session.
#[derive(Clone)]
pub struct SessionEngine {
    shared: Arc<Shared>,
}

impl SessionEngine {
    pub fn builder(sink: Arc<dyn EventSink>) -> EngineBuilder {
        EngineBuilder::new(sink)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn status(&self) -> SessionStatus {
        self.shared.lock().status
    }

    pub fn selected_mode(&self) -> Mode {
        self.shared.lock().mode.clone()
    }

    pub fn lead_in(&self) -> Duration {
        self.shared.lead_in
    }

    pub fn snapshot(&self) -> SessionState {
        let inner = self.shared.lock();
        let (remaining_secs, phase_index) = if inner.armed {
            (
                self.shared.clock.remaining_secs(),
                self.shared.sequencer.phase_index(),
            )
        } else {
            (inner.total_secs, 0)
        };
        SessionState {
            status: inner.status,
            session_id: inner.session_id,
            mode_id: inner.mode.id.clone(),
            phase_index,
            total_secs: inner.total_secs,
            remaining_secs,
            elapsed_secs: inner.total_secs.saturating_sub(remaining_secs),
        }
    }

    /// Stats with the streak as of today.
    pub fn stats(&self) -> Result<StatsRecord> {
        self.shared.ledger.load()
    }

    pub fn ledger(&self) -> &StatsLedger {
        &self.shared.ledger
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Choose the rhythm for the next session. Rejected while running.
    pub fn select_mode(&self, mode: Mode) -> bool {
        let mut inner = self.shared.lock();
        if !self.shared.make_idle(&mut inner) {
            tracing::debug!(mode_id = %mode.id, "mode change rejected while running");
            return false;
        }
        inner.mode = mode;
        true
    }

    /// Choose the length of the next session. Rejected while running.
    pub fn select_duration(&self, total_secs: u32) -> bool {
        let mut inner = self.shared.lock();
        if !self.shared.make_idle(&mut inner) {
            tracing::debug!(total_secs, "duration change rejected while running");
            return false;
        }
        inner.total_secs = total_secs;
        true
    }

    pub fn start_with(&self, config: SessionConfig) -> Result<Uuid> {
        let _gate = self.shared.gate.enter();
        let (session_id, started) = {
            let mut inner = self.shared.lock();
            if !self.shared.make_idle(&mut inner) {
                return Err(CoreError::AlreadyRunning);
            }
            inner.mode = config.mode;
            inner.total_secs = config.total_secs;
            self.begin(&mut inner)?
        };
        deliver(self.shared.sink.as_ref(), &started);
        Ok(session_id)
    }

    /// Begin a session with the selected mode and duration.
    ///
    /// Must be called from within a tokio runtime. Fails fast with
    /// `InvalidMode`/`InvalidDuration`, leaving the engine `Idle`.
    pub fn start(&self) -> Result<Uuid> {
        let _gate = self.shared.gate.enter();
        let (session_id, started) = {
            let mut inner = self.shared.lock();
            self.begin(&mut inner)?
        };
        deliver(self.shared.sink.as_ref(), &started);
        Ok(session_id)
    }

    /// Move to `Running` and spawn the session task. Returns the
    /// `SessionStarted` event for delivery after the lock is released; the
    /// task cannot arm anything before that, as it enters the same gate.
    fn begin(&self, inner: &mut EngineInner) -> Result<(Uuid, Event)> {
        let shared = &self.shared;
        if !shared.make_idle(inner) {
            return Err(CoreError::AlreadyRunning);
        }
        inner.mode.validate()?;
        if inner.total_secs == 0 {
            return Err(CoreError::InvalidDuration);
        }

        inner.generation += 1;
        let generation = inner.generation;
        let session_id = Uuid::new_v4();
        inner.session_id = Some(session_id);
        inner.armed = false;
        shared.set_status(inner, SessionStatus::Running);

        inner.wake_lock = match shared.wake.acquire() {
            Ok(lock) => Some(lock),
            Err(e) => {
                tracing::warn!(error = %e, "continuing without wake lock");
                None
            }
        };

        tracing::info!(
            %session_id,
            mode_id = %inner.mode.id,
            total_secs = inner.total_secs,
            "session started"
        );
        let started = Event::SessionStarted {
            session_id,
            mode_id: inner.mode.id.clone(),
            total_secs: inner.total_secs,
            lead_in_ms: u64::try_from(shared.lead_in.as_millis()).unwrap_or(u64::MAX),
            at: Utc::now(),
        };

        let task_shared = Arc::clone(shared);
        inner.task = Some(tokio::spawn(async move {
            task_shared.run_session(generation).await;
        }));
        Ok((session_id, started))
    }

    /// Interrupt the running session. Returns false when nothing was running.
    pub fn stop(&self) -> bool {
        let shared = &self.shared;
        let _gate = shared.gate.enter();
        let ended = {
            let mut inner = shared.lock();
            if inner.status != SessionStatus::Running {
                return false;
            }
            inner.generation += 1;
            if let Some(task) = inner.task.take() {
                task.abort();
            }
            shared.sequencer.stop();
            shared.clock.stop();
            tracing::info!(session_id = ?inner.session_id, "session stopped");
            shared.end(&mut inner, false)
        };
        shared.announce_end(false, ended);
        true
    }

    /// `Ended -> Idle`. Returns false in any other state.
    pub fn acknowledge(&self) -> bool {
        let mut inner = self.shared.lock();
        if !matches!(inner.status, SessionStatus::Ended { .. }) {
            return false;
        }
        self.shared.reset(&mut inner);
        true
    }

    /// Resolves once the current session ends, with its completion flag.
    /// `None` when no session is running or has ended.
    pub async fn wait_until_ended(&self) -> Option<bool> {
        let mut rx = self.shared.status_tx.subscribe();
        let status = *rx
            .wait_for(|s| *s != SessionStatus::Running)
            .await
            .ok()?;
        match status {
            SessionStatus::Ended { completed } => Some(completed),
            _ => None,
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, inner: &mut EngineInner, status: SessionStatus) {
        inner.status = status;
        self.status_tx.send_replace(status);
    }

    /// Acknowledge an ended session if needed. False while running.
    fn make_idle(&self, inner: &mut EngineInner) -> bool {
        match inner.status {
            SessionStatus::Running => false,
            SessionStatus::Ended { .. } => {
                self.reset(inner);
                true
            }
            SessionStatus::Idle => true,
        }
    }

    fn reset(&self, inner: &mut EngineInner) {
        inner.session_id = None;
        inner.armed = false;
        inner.task = None;
        self.set_status(inner, SessionStatus::Idle);
    }

    async fn run_session(self: Arc<Self>, generation: u64) {
        if !self.lead_in.is_zero() {
            tokio::time::sleep(self.lead_in).await;
        }

        let signal = {
            let _gate = self.gate.enter();
            let (first, countdown, signal) = {
                let mut inner = self.lock();
                if inner.generation != generation || inner.status != SessionStatus::Running {
                    return;
                }
                // Both were validated in begin(); failures here mean that check
                // was bypassed.
                let first = match self.sequencer.arm(inner.mode.clone()) {
                    Ok(first) => first,
                    Err(e) => {
                        tracing::warn!(error = %e, "phase sequencer refused mode");
                        return;
                    }
                };
                let (signal, countdown) = match self.clock.arm(inner.total_secs) {
                    Ok(armed) => armed,
                    Err(e) => {
                        tracing::warn!(error = %e, "session clock refused duration");
                        self.sequencer.stop();
                        return;
                    }
                };
                inner.armed = true;
                (first, countdown, signal)
            };
            self.sequencer.announce(0, first);
            deliver(self.sink.as_ref(), &countdown);
            signal
        };

        if signal.await.is_ok() {
            self.complete(generation);
        }
    }

    fn complete(&self, generation: u64) {
        let _gate = self.gate.enter();
        let ended = {
            let mut inner = self.lock();
            if inner.generation != generation || inner.status != SessionStatus::Running {
                return;
            }
            debug_assert_eq!(self.clock.state(), ClockState::Expired);
            self.sequencer.stop();
            // This runs on the session task itself; detach instead of abort.
            inner.task = None;

            if let Err(e) = self.ledger.commit(u64::from(inner.total_secs)) {
                tracing::warn!(error = %e, "stats not updated");
            }
            tracing::info!(session_id = ?inner.session_id, "session completed");
            self.end(&mut inner, true)
        };
        self.announce_end(true, ended);
    }

    /// Release the wake lock and move to `Ended`. Returns the
    /// `SessionEnded` event for [`Shared::announce_end`].
    fn end(&self, inner: &mut EngineInner, completed: bool) -> Option<Event> {
        if let Some(lock) = inner.wake_lock.take() {
            self.wake.release(lock);
        }
        self.set_status(inner, SessionStatus::Ended { completed });

        let message = completed.then(|| inner.mode.completion_message.clone());
        inner.session_id.map(|session_id| Event::SessionEnded {
            session_id,
            completed,
            message,
            at: Utc::now(),
        })
    }

    /// Fire the end cue and deliver `SessionEnded`. Never called with the
    /// engine lock held.
    fn announce_end(&self, completed: bool, ended: Option<Event>) {
        fire_cue("session end", || self.cues.session_end_cue(completed));
        if let Some(event) = ended {
            deliver(self.sink.as_ref(), &event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::CountingWakeLock;
    use crate::error::ModeError;
    use crate::events::RecordingSink;
    use crate::mode::PhaseKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;
    use tokio::time::sleep;

    fn engine(lead_in_ms: u64) -> (SessionEngine, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let engine = SessionEngine::builder(sink.clone())
            .lead_in(Duration::from_millis(lead_in_ms))
            .build();
        (engine, sink)
    }

    fn mode(id: &str) -> Mode {
        ModeCatalog::builtin().get(id).unwrap().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn start_moves_to_running_and_announces() {
        let (engine, sink) = engine(1000);
        assert_eq!(engine.status(), SessionStatus::Idle);
        let id = engine.start().unwrap();
        assert_eq!(engine.status(), SessionStatus::Running);
        match &sink.events()[..] {
            [Event::SessionStarted {
                session_id,
                mode_id,
                total_secs,
                lead_in_ms,
                ..
            }] => {
                assert_eq!(*session_id, id);
                assert_eq!(mode_id, "balance");
                assert_eq!(*total_secs, 180);
                assert_eq!(*lead_in_ms, 1000);
            }
            other => panic!("Expected SessionStarted only, got {other:?}"),
        }
        engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn first_phase_waits_for_lead_in() {
        let (engine, sink) = engine(1000);
        engine.start().unwrap();
        sleep(Duration::from_millis(900)).await;
        assert!(!sink.events().iter().any(Event::is_phase));
        sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.events().iter().filter(|e| e.is_phase()).count(), 1);
        engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_lead_in_arms_nothing() {
        let (engine, sink) = engine(1000);
        engine.start().unwrap();
        sleep(Duration::from_millis(500)).await;
        assert!(engine.stop());
        sleep(Duration::from_secs(30)).await;
        let events = sink.events();
        assert!(!events.iter().any(|e| e.is_phase() || e.is_progress()));
        assert!(matches!(
            events.last(),
            Some(Event::SessionEnded { completed: false, message: None, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn natural_completion_commits_and_reports_message() {
        let (engine, sink) = engine(0);
        engine.select_mode(mode("calm"));
        engine.select_duration(120);
        engine.start().unwrap();

        assert_eq!(engine.wait_until_ended().await, Some(true));
        assert_eq!(engine.status(), SessionStatus::Ended { completed: true });

        let stats = engine.stats().unwrap();
        assert_eq!(stats.total_secs, 120);
        assert_eq!(stats.streak_days, 1);

        let ended: Vec<_> = sink
            .events()
            .into_iter()
            .filter(Event::is_session_ended)
            .collect();
        assert_eq!(ended.len(), 1);
        match &ended[0] {
            Event::SessionEnded {
                completed, message, ..
            } => {
                assert!(*completed);
                assert_eq!(message.as_deref(), Some(mode("calm").completion_message.as_str()));
            }
            other => panic!("Expected SessionEnded, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_skips_ledger() {
        let (engine, sink) = engine(0);
        engine.select_duration(60);
        engine.start().unwrap();
        sleep(Duration::from_millis(30_500)).await;
        assert!(engine.stop());
        assert_eq!(engine.status(), SessionStatus::Ended { completed: false });
        assert_eq!(engine.stats().unwrap(), StatsRecord::default());

        let before = sink.len();
        sleep(Duration::from_secs(120)).await;
        assert_eq!(sink.len(), before);
        assert!(!engine.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn mode_change_rejected_while_running() {
        let (engine, _sink) = engine(0);
        engine.start().unwrap();
        assert!(!engine.select_mode(mode("box")));
        assert!(!engine.select_duration(30));
        assert_eq!(engine.selected_mode().id, "balance");
        assert!(matches!(engine.start(), Err(CoreError::AlreadyRunning)));
        engine.stop();
        assert!(engine.select_mode(mode("box")));
        assert_eq!(engine.status(), SessionStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_mode_fails_fast_and_stays_idle() {
        let (engine, sink) = engine(0);
        engine.select_mode(Mode {
            id: "empty".into(),
            name: "Empty".into(),
            phases: vec![],
            durations_ms: vec![],
            completion_message: String::new(),
        });
        let err = engine.start().unwrap_err();
        assert!(matches!(err, CoreError::InvalidMode(ModeError::Empty)));
        assert_eq!(engine.status(), SessionStatus::Idle);
        assert!(sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_fails_fast() {
        let (engine, _sink) = engine(0);
        engine.select_duration(0);
        assert!(matches!(engine.start(), Err(CoreError::InvalidDuration)));
        assert_eq!(engine.status(), SessionStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledge_returns_to_idle() {
        let (engine, _sink) = engine(0);
        assert!(!engine.acknowledge());
        engine.start().unwrap();
        assert!(!engine.acknowledge());
        engine.stop();
        assert!(engine.acknowledge());
        let snap = engine.snapshot();
        assert_eq!(snap.status, SessionStatus::Idle);
        assert_eq!(snap.session_id, None);
        assert_eq!(snap.remaining_secs, 180);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_tracks_clock_and_phase() {
        let (engine, _sink) = engine(0);
        engine.select_mode(mode("box"));
        engine.select_duration(60);
        engine.start().unwrap();
        sleep(Duration::from_millis(9_500)).await;
        let snap = engine.snapshot();
        assert_eq!(snap.status, SessionStatus::Running);
        assert_eq!(snap.remaining_secs, 51);
        assert_eq!(snap.elapsed_secs, 9);
        assert_eq!(snap.phase_index, 2);
        assert_eq!(snap.mode_id, "box");
        engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn wake_lock_is_balanced_across_sessions() {
        let sink = Arc::new(RecordingSink::new());
        let wake = Arc::new(CountingWakeLock::new());
        let engine = SessionEngine::builder(sink)
            .lead_in(Duration::ZERO)
            .wake_lock(wake.clone())
            .build();

        engine.select_duration(3);
        engine.start().unwrap();
        assert_eq!(wake.held(), 1);
        engine.stop();
        assert_eq!(wake.held(), 0);

        engine.start().unwrap();
        engine.wait_until_ended().await;
        assert_eq!(wake.held(), 0);
        assert_eq!(wake.acquired_total(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_wake_lock_does_not_block_session() {
        let (engine, _sink) = engine(0);
        engine.select_duration(2);
        engine.start().unwrap();
        assert_eq!(engine.wait_until_ended().await, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_completion_runs_new_session() {
        let (engine, sink) = engine(0);
        engine.select_duration(2);
        let first = engine.start().unwrap();
        engine.wait_until_ended().await;
        let second = engine.start().unwrap();
        assert_ne!(first, second);
        assert_eq!(engine.status(), SessionStatus::Running);
        engine.wait_until_ended().await;
        let ended = sink.events().into_iter().filter(Event::is_session_ended).count();
        assert_eq!(ended, 2);
        assert_eq!(engine.stats().unwrap().sessions_completed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn phase_events_stop_at_completion() {
        let (engine, sink) = engine(0);
        engine.select_mode(mode("box"));
        engine.select_duration(10);
        engine.start().unwrap();
        engine.wait_until_ended().await;
        let count = sink.events().iter().filter(|e| e.is_phase()).count();
        sleep(Duration::from_secs(60)).await;
        assert_eq!(sink.events().iter().filter(|e| e.is_phase()).count(), count);
        let kinds: Vec<_> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::PhaseChanged { kind, .. } => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            [PhaseKind::Inhale, PhaseKind::HoldFull, PhaseKind::Exhale]
        );
    }

    #[derive(Default)]
    struct CountingCues {
        phase: AtomicUsize,
        end: AtomicUsize,
    }

    impl CueSink for CountingCues {
        fn phase_cue(&self, _kind: PhaseKind) -> Result<()> {
            self.phase.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn session_end_cue(&self, _completed: bool) -> Result<()> {
            self.end.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn config_cue_switches_reach_the_cue_sink() {
        let mut config = Config::default();
        config.cues.haptics = false;
        let cues = Arc::new(CountingCues::default());
        let engine = SessionEngine::builder(Arc::new(RecordingSink::new()))
            .config(&config)
            .lead_in(Duration::ZERO)
            .cues(cues.clone())
            .build();
        engine.select_mode(mode("box"));
        engine.select_duration(10);
        engine.start().unwrap();
        engine.wait_until_ended().await;

        assert_eq!(cues.phase.load(Ordering::SeqCst), 0);
        assert_eq!(cues.end.load(Ordering::SeqCst), 1);

        config.cues.haptics = true;
        config.cues.bell = false;
        let cues = Arc::new(CountingCues::default());
        let engine = SessionEngine::builder(Arc::new(RecordingSink::new()))
            .config(&config)
            .lead_in(Duration::ZERO)
            .cues(cues.clone())
            .build();
        engine.select_mode(mode("box"));
        engine.select_duration(10);
        engine.start().unwrap();
        engine.wait_until_ended().await;

        // Box phases at 0, 4 and 8 seconds.
        assert_eq!(cues.phase.load(Ordering::SeqCst), 3);
        assert_eq!(cues.end.load(Ordering::SeqCst), 0);
    }

    /// Stops the engine from inside its own `SessionStarted` callback.
    struct StopOnStart {
        engine: OnceLock<SessionEngine>,
        inner: RecordingSink,
    }

    impl EventSink for StopOnStart {
        fn emit(&self, event: &Event) {
            self.inner.emit(event);
            if matches!(event, Event::SessionStarted { .. }) {
                if let Some(engine) = self.engine.get() {
                    assert!(engine.stop());
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sink_can_stop_from_session_started() {
        let sink = Arc::new(StopOnStart {
            engine: OnceLock::new(),
            inner: RecordingSink::new(),
        });
        let engine = SessionEngine::builder(sink.clone())
            .lead_in(Duration::ZERO)
            .build();
        let _ = sink.engine.set(engine.clone());

        engine.start().unwrap();
        assert_eq!(engine.status(), SessionStatus::Ended { completed: false });
        sleep(Duration::from_secs(120)).await;

        let events = sink.inner.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::SessionStarted { .. }));
        assert!(matches!(events[1], Event::SessionEnded { completed: false, .. }));
    }
}
