use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::mode::PhaseKind;

/// Every observable state change of a session produces an Event.
/// The presentation layer subscribes through an [`EventSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    SessionStarted {
        session_id: Uuid,
        mode_id: String,
        total_secs: u32,
        lead_in_ms: u64,
        at: DateTime<Utc>,
    },
    PhaseChanged {
        phase_index: usize,
        kind: PhaseKind,
        duration_ms: u64,
        /// Scale bound an active phase animates towards; `None` for holds.
        target_scale: Option<f64>,
        at: DateTime<Utc>,
    },
    /// Initial clock state, emitted once when the countdown is armed.
    CountdownStarted {
        total_secs: u32,
        remaining_secs: u32,
        fraction: f64,
        at: DateTime<Utc>,
    },
    /// One per elapsed second.
    Progress {
        remaining_secs: u32,
        elapsed_secs: u32,
        fraction: f64,
        at: DateTime<Utc>,
    },
    SessionEnded {
        session_id: Uuid,
        completed: bool,
        message: Option<String>,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn phase_changed(phase_index: usize, kind: PhaseKind, duration_ms: u64) -> Self {
        Event::PhaseChanged {
            phase_index,
            kind,
            duration_ms,
            target_scale: kind.target_scale(),
            at: Utc::now(),
        }
    }

    pub fn is_phase(&self) -> bool {
        matches!(self, Event::PhaseChanged { .. })
    }

    pub fn is_progress(&self) -> bool {
        matches!(self, Event::Progress { .. })
    }

    pub fn is_session_ended(&self) -> bool {
        matches!(self, Event::SessionEnded { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::SessionStarted { .. } => "session_started",
            Event::PhaseChanged { .. } => "phase_changed",
            Event::CountdownStarted { .. } => "countdown_started",
            Event::Progress { .. } => "progress",
            Event::SessionEnded { .. } => "session_ended",
        }
    }
}

/// Push-model receiver for engine events.
///
/// `emit` runs synchronously on the timer task that produced the event,
/// after the producing component has released its state lock, so it may
/// call back into the engine (`stop()` from a `Progress` handler, say).
/// It should return quickly. A panic is caught and logged; the event is
/// lost but the session carries on.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Forwards events into a tokio channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &Event) {
        // Receiver gone means nobody is watching; the session carries on.
        let _ = self.tx.send(event.clone());
    }
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &Event) {}
}

/// Hand `event` to `sink`, containing a panic to this one delivery.
pub(crate) fn deliver(sink: &dyn EventSink, event: &Event) {
    if panic::catch_unwind(AssertUnwindSafe(|| sink.emit(event))).is_err() {
        tracing::warn!(event = event.name(), "event sink panicked, event dropped");
    }
}

thread_local! {
    /// Gates this thread is currently inside, by address.
    static ENTERED: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Orders event delivery against cancellation for one engine.
///
/// Producers enter the gate, check their generation under their own lock,
/// release that lock and deliver. `stop()` enters the same gate, so once it
/// returns no stale event is still in flight. Entering is reentrant per
/// thread: a sink calling `stop()` from inside `emit` passes straight in.
#[derive(Default)]
pub(crate) struct EmitGate {
    lock: Mutex<()>,
}

pub(crate) struct GateGuard<'a> {
    id: usize,
    held: Option<MutexGuard<'a, ()>>,
}

impl EmitGate {
    pub(crate) fn enter(&self) -> GateGuard<'_> {
        let id = self as *const Self as usize;
        if ENTERED.with(|entered| entered.borrow().contains(&id)) {
            return GateGuard { id, held: None };
        }
        let held = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        ENTERED.with(|entered| entered.borrow_mut().push(id));
        GateGuard {
            id,
            held: Some(held),
        }
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        if self.held.is_some() {
            ENTERED.with(|entered| {
                let mut entered = entered.borrow_mut();
                if let Some(pos) = entered.iter().rposition(|id| *id == self.id) {
                    entered.remove(pos);
                }
            });
        }
    }
}
