//! Practice statistics: lifetime seconds and consecutive-day streak.
//!
//! The streak arithmetic is a pure function of the stored record and the
//! calendar date, kept apart from any timing code.

use std::sync::{Mutex, PoisonError};

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{PersistenceError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsRecord {
    /// Lifetime accumulated practice, in seconds.
    pub total_secs: u64,
    pub streak_days: u32,
    #[serde(default)]
    pub last_practiced: Option<NaiveDate>,
    #[serde(default)]
    pub sessions_completed: u64,
}

impl StatsRecord {
    /// Streak as it stands on `today`: a gap of more than one calendar day
    /// since the last completion breaks it.
    pub fn effective_streak(&self, today: NaiveDate) -> u32 {
        match self.last_practiced {
            Some(last) if days_between(last, today) <= 1 => self.streak_days,
            _ => 0,
        }
    }

    /// The record after one more completed session of `secs` on `today`.
    pub fn record_completion(&self, secs: u64, today: NaiveDate) -> StatsRecord {
        let streak_days = match self.last_practiced {
            // Same day, or the clock moved backwards.
            Some(last) if days_between(last, today) <= 0 => self.streak_days.max(1),
            Some(last) if days_between(last, today) == 1 => self.streak_days.saturating_add(1),
            _ => 1,
        };
        let last_practiced = match self.last_practiced {
            Some(last) if last > today => Some(last),
            _ => Some(today),
        };
        StatsRecord {
            total_secs: self.total_secs.saturating_add(secs),
            streak_days,
            last_practiced,
            sessions_completed: self.sessions_completed.saturating_add(1),
        }
    }
}

fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    to.signed_duration_since(from).num_days()
}

/// Local calendar date, the unit streaks are counted in.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Durable home of the single stats record.
pub trait StatsStore: Send + Sync {
    fn load(&self) -> Result<StatsRecord, PersistenceError>;
    fn save(&self, record: &StatsRecord) -> Result<(), PersistenceError>;
}

/// In-process store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStatsStore {
    record: Mutex<StatsRecord>,
}

impl MemoryStatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: StatsRecord) -> Self {
        Self {
            record: Mutex::new(record),
        }
    }
}

impl StatsStore for MemoryStatsStore {
    fn load(&self) -> Result<StatsRecord, PersistenceError> {
        Ok(self
            .record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, record: &StatsRecord) -> Result<(), PersistenceError> {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = record.clone();
        Ok(())
    }
}

/// Read-modify-write access to the stats record.
pub struct StatsLedger {
    store: Box<dyn StatsStore>,
}

impl StatsLedger {
    pub fn new(store: Box<dyn StatsStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStatsStore::new()))
    }

    /// The stored record with its streak normalised to `today`.
    pub fn load_on(&self, today: NaiveDate) -> Result<StatsRecord> {
        let mut record = self.store.load()?;
        record.streak_days = record.effective_streak(today);
        Ok(record)
    }

    pub fn load(&self) -> Result<StatsRecord> {
        self.load_on(today())
    }

    /// Raw stored record, no normalisation.
    pub fn raw(&self) -> Result<StatsRecord> {
        Ok(self.store.load()?)
    }

    pub fn save(&self, record: &StatsRecord) -> Result<()> {
        Ok(self.store.save(record)?)
    }

    /// Add one completed session of `secs` on `today`.
    pub fn commit_on(&self, secs: u64, today: NaiveDate) -> Result<StatsRecord> {
        let updated = self.store.load()?.record_completion(secs, today);
        self.store.save(&updated)?;
        tracing::info!(
            total_secs = updated.total_secs,
            streak_days = updated.streak_days,
            "stats committed"
        );
        Ok(updated)
    }

    pub fn commit(&self, secs: u64) -> Result<StatsRecord> {
        self.commit_on(secs, today())
    }

    pub fn reset(&self) -> Result<()> {
        self.save(&StatsRecord::default())
    }
}
