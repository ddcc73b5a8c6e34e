//! Session clock.
//!
//! Counts a session down at 1 Hz, independently of phase timing, and
//! resolves a one-shot completion signal exactly once when the countdown
//! reaches zero. The expiring tick cancels the clock's own schedule before
//! it releases the lock, so no second tick can observe the terminal state.
//! Progress is delivered after the lock is released; the completion signal
//! is sent after that last delivery.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::{CoreError, Result};
use crate::events::{deliver, EmitGate, Event, EventSink};

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Idle,
    Counting,
    Expired,
    Stopped,
}

struct ClockInner {
    state: ClockState,
    total_secs: u32,
    remaining_secs: u32,
    generation: u64,
    completion: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

/// Resolves when the countdown expires. Errors (sender dropped) when the
/// clock was stopped or restarted first.
pub type CompletionSignal = oneshot::Receiver<()>;

/// Cheap to clone; clones drive the same clock.
#[derive(Clone)]
pub struct SessionClock {
    inner: Arc<Mutex<ClockInner>>,
    sink: Arc<dyn EventSink>,
    gate: Arc<EmitGate>,
}

impl SessionClock {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self::with_gate(sink, Arc::new(EmitGate::default()))
    }

    pub(crate) fn with_gate(sink: Arc<dyn EventSink>, gate: Arc<EmitGate>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                state: ClockState::Idle,
                total_secs: 0,
                remaining_secs: 0,
                generation: 0,
                completion: None,
                task: None,
            })),
            sink,
            gate,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClockInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ClockState {
        self.lock().state
    }

    pub fn remaining_secs(&self) -> u32 {
        self.lock().remaining_secs
    }

    pub fn elapsed_secs(&self) -> u32 {
        let inner = self.lock();
        inner.total_secs - inner.remaining_secs
    }

    /// Elapsed share of the session, 0.0 ..= 1.0.
    pub fn fraction(&self) -> f64 {
        let inner = self.lock();
        fraction(inner.total_secs, inner.remaining_secs)
    }

    /// Arm the countdown. Must be called from within a tokio runtime.
    pub fn start(&self, total_secs: u32) -> Result<CompletionSignal> {
        let _gate = self.gate.enter();
        let (signal, started) = self.arm(total_secs)?;
        deliver(self.sink.as_ref(), &started);
        Ok(signal)
    }

    /// Arm the countdown, returning the `CountdownStarted` event for the
    /// caller to deliver once its own locks are released.
    pub(crate) fn arm(&self, total_secs: u32) -> Result<(CompletionSignal, Event)> {
        if total_secs == 0 {
            return Err(CoreError::InvalidDuration);
        }

        let mut inner = self.lock();
        Self::cancel(&mut inner);
        inner.generation += 1;
        inner.state = ClockState::Counting;
        inner.total_secs = total_secs;
        inner.remaining_secs = total_secs;

        let (tx, rx) = oneshot::channel();
        inner.completion = Some(tx);

        let generation = inner.generation;
        let this = self.clone();
        inner.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + TICK, TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
            loop {
                ticker.tick().await;
                if !this.tick(generation) {
                    return;
                }
            }
        }));

        let started = Event::CountdownStarted {
            total_secs,
            remaining_secs: total_secs,
            fraction: 0.0,
            at: Utc::now(),
        };
        Ok((rx, started))
    }

    /// Cancel the countdown without signalling completion. Idempotent.
    pub fn stop(&self) {
        let _gate = self.gate.enter();
        let mut inner = self.lock();
        if inner.state != ClockState::Counting {
            return;
        }
        Self::cancel(&mut inner);
        inner.generation += 1;
        inner.state = ClockState::Stopped;
        // Dropping the sender tells the waiter the session did not complete.
        inner.completion = None;
        tracing::debug!(remaining_secs = inner.remaining_secs, "session clock stopped");
    }

    fn cancel(inner: &mut ClockInner) {
        if let Some(task) = inner.task.take() {
            task.abort();
        }
    }

    /// One elapsed second. Returns whether the schedule should keep going.
    fn tick(&self, generation: u64) -> bool {
        let _gate = self.gate.enter();
        let (progress, expired, completion) = {
            let mut inner = self.lock();
            if inner.generation != generation || inner.state != ClockState::Counting {
                return false;
            }

            inner.remaining_secs = inner.remaining_secs.saturating_sub(1);
            let remaining_secs = inner.remaining_secs;
            let total_secs = inner.total_secs;
            let progress = Event::Progress {
                remaining_secs,
                elapsed_secs: total_secs - remaining_secs,
                fraction: fraction(total_secs, remaining_secs),
                at: Utc::now(),
            };

            if remaining_secs > 0 {
                (progress, false, None)
            } else {
                // Expired: invalidate the schedule in this same tick. The task
                // is the caller, so it ends by returning false, not by abort.
                inner.generation += 1;
                inner.task = None;
                inner.state = ClockState::Expired;
                tracing::debug!(total_secs, "session clock expired");
                (progress, true, inner.completion.take())
            }
        };

        deliver(self.sink.as_ref(), &progress);
        if let Some(tx) = completion {
            let _ = tx.send(());
        }
        !expired
    }
}

fn fraction(total_secs: u32, remaining_secs: u32) -> f64 {
    if total_secs == 0 {
        return 0.0;
    }
    f64::from(total_secs - remaining_secs) / f64::from(total_secs)
}

/// Format seconds as `MM:SS`.
pub fn format_mmss(secs: u32) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
