//! # Respira Core Library
//!
//! This library provides the core logic for Respira, a guided breathing
//! timer. The CLI binary is a thin layer over the same library, and any
//! other front end (GUI, widget) is expected to be one too.
//!
//! ## Architecture
//!
//! - **Phase Sequencer**: loops a mode's phases, each phase scheduling its
//!   successor after its own duration
//! - **Session Clock**: 1 Hz countdown that signals completion exactly once
//! - **Session Engine**: composition root and the only public state machine
//!   (`Idle -> Running -> Ended -> Idle`)
//! - **Stats**: lifetime practice time and day streak, SQLite-backed
//! - **Storage**: TOML configuration and SQLite persistence
//!
//! ## Key Components
//!
//! - [`SessionEngine`]: start/stop/acknowledge a session
//! - [`Mode`] and [`ModeCatalog`]: breathing rhythms
//! - [`Event`] and [`EventSink`]: what the presentation layer receives
//! - [`StatsLedger`]: practice statistics
//! - [`Config`]: application configuration management

pub mod clock;
pub mod collab;
pub mod engine;
pub mod error;
pub mod events;
pub mod mode;
pub mod sequencer;
pub mod stats;
pub mod storage;

pub use clock::{format_mmss, ClockState, SessionClock};
pub use collab::{
    CountingWakeLock, CuePreferences, CueSink, NoWakeLock, SilentCues, WakeLock, WakeLockProvider,
};
pub use engine::{EngineBuilder, SessionConfig, SessionEngine, SessionState, SessionStatus};
pub use error::{ConfigError, CoreError, ModeError, PersistenceError};
pub use events::{ChannelSink, Event, EventSink, NullSink, RecordingSink};
pub use mode::{Mode, ModeCatalog, Phase, PhaseKind, DEFAULT_MODE_ID};
pub use sequencer::PhaseSequencer;
pub use stats::{MemoryStatsStore, StatsLedger, StatsRecord, StatsStore};
pub use storage::{Config, Database, SqliteStatsStore};
