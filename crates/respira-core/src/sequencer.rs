//! Phase sequencer.
//!
//! Cycles through a mode's phases forever, each phase scheduling its own
//! successor after its own duration. Deadlines are chained from the previous
//! deadline rather than from "now", so lateness in one callback does not
//! accumulate into the next phase.
//!
//! ## Cancellation
//!
//! Every scheduled advance captures the generation number current when it
//! was armed. `stop()` bumps the generation and aborts the task; an advance
//! that was already in flight sees the mismatch under the lock and does
//! nothing. Events and cues are delivered after the state lock is released,
//! so a listener may stop the sequencer from inside its own callback.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::collab::{fire_cue, CueSink};
use crate::error::{ModeError, Result};
use crate::events::{deliver, EmitGate, Event, EventSink};
use crate::mode::{Mode, Phase};

#[derive(Default)]
struct SequencerState {
    mode: Option<Mode>,
    phase_index: usize,
    cycles_completed: u64,
    generation: u64,
    running: bool,
    task: Option<JoinHandle<()>>,
}

/// Cheap to clone; clones drive the same sequencer.
#[derive(Clone)]
pub struct PhaseSequencer {
    state: Arc<Mutex<SequencerState>>,
    sink: Arc<dyn EventSink>,
    cues: Arc<dyn CueSink>,
    gate: Arc<EmitGate>,
}

impl PhaseSequencer {
    pub fn new(sink: Arc<dyn EventSink>, cues: Arc<dyn CueSink>) -> Self {
        Self::with_gate(sink, cues, Arc::new(EmitGate::default()))
    }

    pub(crate) fn with_gate(
        sink: Arc<dyn EventSink>,
        cues: Arc<dyn CueSink>,
        gate: Arc<EmitGate>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(SequencerState::default())),
            sink,
            cues,
            gate,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SequencerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn phase_index(&self) -> usize {
        self.lock().phase_index
    }

    pub fn current_phase(&self) -> Option<Phase> {
        let state = self.lock();
        state.mode.as_ref()?.phase(state.phase_index)
    }

    /// Number of times the cycle wrapped back to its first phase.
    pub fn cycles_completed(&self) -> u64 {
        self.lock().cycles_completed
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Fire the first phase now and schedule the rest.
    ///
    /// Must be called from within a tokio runtime. Calling it while
    /// already running restarts from phase 0.
    pub fn start(&self, mode: Mode) -> Result<()> {
        let _gate = self.gate.enter();
        let first = self.arm(mode)?;
        self.announce(0, first);
        Ok(())
    }

    /// Reset to phase 0 and schedule the first advance. The caller
    /// announces the returned first phase once its own locks are released.
    pub(crate) fn arm(&self, mode: Mode) -> Result<Phase> {
        mode.validate()?;
        let first = mode.phase(0).ok_or(ModeError::Empty)?;

        let mut state = self.lock();
        Self::cancel(&mut state);
        state.generation += 1;
        state.phase_index = 0;
        state.cycles_completed = 0;
        state.running = true;
        state.mode = Some(mode);

        let deadline = Instant::now() + Duration::from_millis(first.duration_ms);
        let generation = state.generation;
        let this = self.clone();
        state.task = Some(tokio::spawn(async move {
            this.run(generation, deadline).await;
        }));
        Ok(first)
    }

    /// Cancel the pending advance. Idempotent.
    pub fn stop(&self) {
        let _gate = self.gate.enter();
        let mut state = self.lock();
        if !state.running {
            return;
        }
        Self::cancel(&mut state);
        state.generation += 1;
        state.running = false;
        tracing::debug!(phase_index = state.phase_index, "phase sequencer stopped");
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn cancel(state: &mut SequencerState) {
        if let Some(task) = state.task.take() {
            task.abort();
        }
    }

    async fn run(&self, generation: u64, mut deadline: Instant) {
        loop {
            sleep_until(deadline).await;
            match self.advance(generation) {
                Some(next_ms) => deadline += Duration::from_millis(next_ms),
                None => return,
            }
        }
    }

    /// Move to the next phase. Returns the new phase's duration, or `None`
    /// when this schedule has gone stale.
    fn advance(&self, generation: u64) -> Option<u64> {
        let _gate = self.gate.enter();
        let (index, phase) = {
            let mut state = self.lock();
            if state.generation != generation || !state.running {
                return None;
            }
            let len = state.mode.as_ref()?.len();
            state.phase_index = (state.phase_index + 1) % len;
            if state.phase_index == 0 {
                state.cycles_completed += 1;
            }
            let index = state.phase_index;
            (index, state.mode.as_ref()?.phase(index)?)
        };
        self.announce(index, phase);
        Some(phase.duration_ms)
    }

    /// Deliver a phase change. Never called with the state lock held.
    pub(crate) fn announce(&self, index: usize, phase: Phase) {
        tracing::debug!(
            phase_index = index,
            kind = ?phase.kind,
            duration_ms = phase.duration_ms,
            "phase changed"
        );
        deliver(
            self.sink.as_ref(),
            &Event::phase_changed(index, phase.kind, phase.duration_ms),
        );
        fire_cue("phase", || self.cues.phase_cue(phase.kind));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::SilentCues;
    use crate::error::{CoreError, ModeError};
    use crate::events::RecordingSink;
    use crate::mode::{ModeCatalog, PhaseKind};
    use tokio::time::sleep;

    fn sequencer() -> (PhaseSequencer, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        (PhaseSequencer::new(sink.clone(), Arc::new(SilentCues)), sink)
    }

    fn kinds(sink: &RecordingSink) -> Vec<PhaseKind> {
        sink.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::PhaseChanged { kind, .. } => Some(kind),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn first_phase_fires_immediately() {
        let (seq, sink) = sequencer();
        let calm = ModeCatalog::builtin().get("calm").unwrap().clone();
        seq.start(calm).unwrap();
        assert_eq!(kinds(&sink), [PhaseKind::Inhale]);
        assert!(seq.is_running());
        seq.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn each_phase_waits_its_own_duration() {
        let (seq, sink) = sequencer();
        let calm = ModeCatalog::builtin().get("calm").unwrap().clone(); // 4000 / 6000
        seq.start(calm).unwrap();

        sleep(Duration::from_millis(3_900)).await;
        assert_eq!(sink.len(), 1);
        sleep(Duration::from_millis(200)).await; // 4.1s
        assert_eq!(kinds(&sink), [PhaseKind::Inhale, PhaseKind::Exhale]);
        sleep(Duration::from_millis(5_800)).await; // 9.9s
        assert_eq!(sink.len(), 2);
        sleep(Duration::from_millis(200)).await; // 10.1s
        assert_eq!(
            kinds(&sink),
            [PhaseKind::Inhale, PhaseKind::Exhale, PhaseKind::Inhale]
        );
        assert_eq!(seq.cycles_completed(), 1);
        seq.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn box_mode_loops_through_all_four_phases() {
        let (seq, sink) = sequencer();
        let square = ModeCatalog::builtin().get("box").unwrap().clone();
        seq.start(square).unwrap();
        sleep(Duration::from_millis(16_500)).await;
        assert_eq!(
            kinds(&sink),
            [
                PhaseKind::Inhale,
                PhaseKind::HoldFull,
                PhaseKind::Exhale,
                PhaseKind::HoldEmpty,
                PhaseKind::Inhale,
            ]
        );
        assert_eq!(seq.current_phase().unwrap().kind, PhaseKind::Inhale);
        seq.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_silences_pending_advance() {
        let (seq, sink) = sequencer();
        let balance = ModeCatalog::builtin().get("balance").unwrap().clone();
        seq.start(balance).unwrap();
        sleep(Duration::from_millis(2_000)).await;
        seq.stop();
        let before = sink.len();
        sleep(Duration::from_secs(120)).await;
        assert_eq!(sink.len(), before);
        assert!(!seq.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let (seq, _sink) = sequencer();
        seq.stop();
        let balance = ModeCatalog::builtin().get("balance").unwrap().clone();
        seq.start(balance).unwrap();
        seq.stop();
        seq.stop();
        assert!(!seq.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generation_does_not_advance() {
        let (seq, sink) = sequencer();
        let balance = ModeCatalog::builtin().get("balance").unwrap().clone();
        seq.start(balance).unwrap();
        let stale = seq.lock().generation;
        seq.stop();
        assert_eq!(seq.advance(stale), None);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_keeps_a_single_schedule() {
        let (seq, sink) = sequencer();
        let balance = ModeCatalog::builtin().get("balance").unwrap().clone();
        seq.start(balance.clone()).unwrap();
        sleep(Duration::from_millis(2_500)).await;
        seq.start(balance).unwrap();
        sink.clear();
        sleep(Duration::from_millis(5_500)).await;
        // Only the restarted schedule fires: one advance at +5s.
        assert_eq!(kinds(&sink), [PhaseKind::Exhale]);
        seq.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn empty_mode_fails_fast() {
        let (seq, sink) = sequencer();
        let empty = Mode {
            id: "empty".into(),
            name: "Empty".into(),
            phases: vec![],
            durations_ms: vec![],
            completion_message: String::new(),
        };
        let err = seq.start(empty).unwrap_err();
        assert!(matches!(err, CoreError::InvalidMode(ModeError::Empty)));
        assert!(!seq.is_running());
        assert!(sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn active_phase_matches_cycle_offset() {
        let (seq, _sink) = sequencer();
        let square = ModeCatalog::builtin().get("box").unwrap().clone();
        let cycle = square.cycle_ms();
        seq.start(square.clone()).unwrap();
        // Three full cycles plus two phases, sampled mid-phase.
        let offset = cycle * 3 + 4_000 * 2 + 500;
        sleep(Duration::from_millis(offset)).await;
        assert_eq!(seq.phase_index(), 2);
        assert_eq!(square.phase_at_offset(offset), Some(2));
        seq.stop();
    }

    /// Stops its sequencer when the given phase index is announced.
    struct StopOnPhase {
        at: usize,
        seq: std::sync::OnceLock<PhaseSequencer>,
        inner: RecordingSink,
    }

    impl EventSink for StopOnPhase {
        fn emit(&self, event: &Event) {
            self.inner.emit(event);
            if let Event::PhaseChanged { phase_index, .. } = event {
                if *phase_index == self.at {
                    if let Some(seq) = self.seq.get() {
                        seq.stop();
                    }
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn listener_can_stop_from_its_own_callback() {
        let sink = Arc::new(StopOnPhase {
            at: 2,
            seq: std::sync::OnceLock::new(),
            inner: RecordingSink::new(),
        });
        let seq = PhaseSequencer::new(sink.clone(), Arc::new(SilentCues));
        let _ = sink.seq.set(seq.clone());
        seq.start(ModeCatalog::builtin().get("box").unwrap().clone())
            .unwrap();

        sleep(Duration::from_secs(60)).await;
        assert!(!seq.is_running());
        assert_eq!(sink.inner.len(), 3);
    }

    struct PanicOnHold;

    impl EventSink for PanicOnHold {
        fn emit(&self, event: &Event) {
            if let Event::PhaseChanged {
                kind: PhaseKind::HoldFull,
                ..
            } = event
            {
                panic!("renderer crashed");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_sink_does_not_kill_the_schedule() {
        let seq = PhaseSequencer::new(Arc::new(PanicOnHold), Arc::new(SilentCues));
        seq.start(ModeCatalog::builtin().get("box").unwrap().clone())
            .unwrap();
        sleep(Duration::from_millis(16_500)).await;
        assert_eq!(seq.cycles_completed(), 1);
        assert!(seq.is_running());
        seq.stop();
    }
}
