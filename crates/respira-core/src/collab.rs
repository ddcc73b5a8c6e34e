//! Side-effecting collaborators the engine calls into: screen wake lock and
//! haptic/audio cues. Every call is best effort; failures are reported as
//! [`CoreError::ResourceUnavailable`] and the engine logs and moves on.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{CoreError, Result};
use crate::mode::PhaseKind;

/// Opaque handle for an acquired wake lock.
#[derive(Debug, PartialEq, Eq)]
pub struct WakeLock {
    id: u64,
}

impl WakeLock {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

pub trait WakeLockProvider: Send + Sync {
    fn acquire(&self) -> Result<WakeLock>;
    fn release(&self, lock: WakeLock);
}

/// Platform without a wake lock API.
pub struct NoWakeLock;

impl WakeLockProvider for NoWakeLock {
    fn acquire(&self) -> Result<WakeLock> {
        Err(CoreError::unavailable("wake lock", "not supported"))
    }

    fn release(&self, _lock: WakeLock) {}
}

/// Hands out numbered locks and tracks how many are outstanding.
#[derive(Default)]
pub struct CountingWakeLock {
    next: AtomicU64,
    held: AtomicU64,
}

impl CountingWakeLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn held(&self) -> u64 {
        self.held.load(Ordering::SeqCst)
    }

    pub fn acquired_total(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

impl WakeLockProvider for CountingWakeLock {
    fn acquire(&self) -> Result<WakeLock> {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        self.held.fetch_add(1, Ordering::SeqCst);
        Ok(WakeLock::new(id))
    }

    fn release(&self, _lock: WakeLock) {
        self.held.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fire-and-forget haptic/audio notifications.
pub trait CueSink: Send + Sync {
    fn phase_cue(&self, kind: PhaseKind) -> Result<()>;
    fn session_end_cue(&self, completed: bool) -> Result<()>;
}

pub struct SilentCues;

impl CueSink for SilentCues {
    fn phase_cue(&self, _kind: PhaseKind) -> Result<()> {
        Ok(())
    }

    fn session_end_cue(&self, _completed: bool) -> Result<()> {
        Ok(())
    }
}

/// Honours the user's cue switches in front of another [`CueSink`]:
/// `haptics` gates phase cues, `bell` gates the session-end cue.
pub struct CuePreferences {
    inner: Arc<dyn CueSink>,
    haptics: bool,
    bell: bool,
}

impl CuePreferences {
    pub fn new(inner: Arc<dyn CueSink>, haptics: bool, bell: bool) -> Self {
        Self {
            inner,
            haptics,
            bell,
        }
    }
}

impl CueSink for CuePreferences {
    fn phase_cue(&self, kind: PhaseKind) -> Result<()> {
        if !self.haptics {
            return Ok(());
        }
        self.inner.phase_cue(kind)
    }

    fn session_end_cue(&self, completed: bool) -> Result<()> {
        if !self.bell {
            return Ok(());
        }
        self.inner.session_end_cue(completed)
    }
}

/// Run one cue, logging an error or a panic instead of propagating it.
pub(crate) fn fire_cue(cue: &'static str, call: impl FnOnce() -> Result<()>) {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(cue, error = %e, "cue failed"),
        Err(_) => tracing::warn!(cue, "cue panicked"),
    }
}
