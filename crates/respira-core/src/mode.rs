//! Breathing modes: an ordered, looping cycle of phases with per-phase
//! durations and a coaching message shown when a session completes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ModeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Inhale,
    HoldFull,
    Exhale,
    HoldEmpty,
}

impl PhaseKind {
    /// Active phases drive a continuous size transform over their duration.
    pub fn is_active(&self) -> bool {
        matches!(self, PhaseKind::Inhale | PhaseKind::Exhale)
    }

    /// Static phases drive a countdown/fill indicator, no size transform.
    pub fn is_static(&self) -> bool {
        !self.is_active()
    }

    /// Scale the guide transitions to during this phase.
    pub fn target_scale(&self) -> Option<f64> {
        match self {
            PhaseKind::Inhale => Some(4.5),
            PhaseKind::Exhale => Some(1.0),
            PhaseKind::HoldFull | PhaseKind::HoldEmpty => None,
        }
    }

    pub fn cue_label(&self) -> &'static str {
        match self {
            PhaseKind::Inhale => "Breathe in",
            PhaseKind::HoldFull => "Hold (full)",
            PhaseKind::Exhale => "Breathe out",
            PhaseKind::HoldEmpty => "Hold (empty)",
        }
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.cue_label())
    }
}

/// One step of a mode's cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    pub kind: PhaseKind,
    pub duration_ms: u64,
}

/// A named breathing rhythm.
///
/// `phases` and `durations_ms` are index-aligned. Construct through
/// [`Mode::new`] to get the invariants checked; modes deserialized from
/// config are checked again with [`Mode::validate`] before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode {
    pub id: String,
    pub name: String,
    pub phases: Vec<PhaseKind>,
    pub durations_ms: Vec<u64>,
    #[serde(default)]
    pub completion_message: String,
}

impl Mode {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        phases: Vec<PhaseKind>,
        durations_ms: Vec<u64>,
        completion_message: impl Into<String>,
    ) -> Result<Self, ModeError> {
        let mode = Self {
            id: id.into(),
            name: name.into(),
            phases,
            durations_ms,
            completion_message: completion_message.into(),
        };
        mode.validate()?;
        Ok(mode)
    }

    pub fn validate(&self) -> Result<(), ModeError> {
        if self.phases.is_empty() {
            return Err(ModeError::Empty);
        }
        if self.phases.len() != self.durations_ms.len() {
            return Err(ModeError::LengthMismatch {
                phases: self.phases.len(),
                durations: self.durations_ms.len(),
            });
        }
        if let Some(index) = self.durations_ms.iter().position(|&d| d == 0) {
            return Err(ModeError::ZeroDuration { index });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn phase(&self, index: usize) -> Option<Phase> {
        let kind = *self.phases.get(index)?;
        let duration_ms = *self.durations_ms.get(index)?;
        Some(Phase { kind, duration_ms })
    }

    pub fn phases(&self) -> impl Iterator<Item = Phase> + '_ {
        self.phases
            .iter()
            .zip(&self.durations_ms)
            .map(|(&kind, &duration_ms)| Phase { kind, duration_ms })
    }

    /// Length of one full cycle in milliseconds.
    pub fn cycle_ms(&self) -> u64 {
        self.durations_ms.iter().sum()
    }

    /// Index of the phase active `offset_ms` after the first phase fired.
    ///
    /// A phase boundary belongs to the phase that starts there.
    pub fn phase_at_offset(&self, offset_ms: u64) -> Option<usize> {
        let cycle = self.cycle_ms();
        if cycle == 0 {
            return None;
        }
        let mut within = offset_ms % cycle;
        for (i, &d) in self.durations_ms.iter().enumerate() {
            if within < d {
                return Some(i);
            }
            within -= d;
        }
        None
    }
}

/// Registry of available modes, built-ins first.
#[derive(Debug, Clone)]
pub struct ModeCatalog {
    modes: BTreeMap<String, Mode>,
    order: Vec<String>,
}

pub const DEFAULT_MODE_ID: &str = "balance";

impl ModeCatalog {
    /// The five rhythms shipped with the app.
    pub fn builtin() -> Self {
        use PhaseKind::*;

        let defs: [(&str, &str, Vec<PhaseKind>, Vec<u64>, &str); 5] = [
            (
                "balance",
                "Balance",
                vec![Inhale, Exhale],
                vec![5000, 5000],
                "Your nervous system has been reset. You are ready to take on what comes next with clarity.",
            ),
            (
                "calm",
                "Back to calm",
                vec![Inhale, Exhale],
                vec![4000, 6000],
                "Calm has returned. Keep this feeling of release with you for the next few hours.",
            ),
            (
                "sleep",
                "Sleep",
                vec![Inhale, Exhale],
                vec![4000, 8000],
                "Your body is ready to rest. Let this softness carry you.",
            ),
            (
                "focus",
                "Focus",
                vec![Inhale, Exhale],
                vec![6000, 4000],
                "Your mind is sharp. Use this energy for your next key action.",
            ),
            (
                "box",
                "Box",
                vec![Inhale, HoldFull, Exhale, HoldEmpty],
                vec![4000, 4000, 4000, 4000],
                "You have taken back control. Your mind is completely clear.",
            ),
        ];

        let mut catalog = Self {
            modes: BTreeMap::new(),
            order: Vec::new(),
        };
        for (id, name, phases, durations, message) in defs {
            catalog.insert(Mode {
                id: id.into(),
                name: name.into(),
                phases,
                durations_ms: durations,
                completion_message: message.into(),
            });
        }
        catalog
    }

    /// Built-ins plus user-defined modes. A custom mode whose id matches a
    /// built-in replaces it; invalid custom modes are rejected.
    pub fn with_custom(custom: &[Mode]) -> Result<Self, ModeError> {
        let mut catalog = Self::builtin();
        for mode in custom {
            mode.validate()?;
            catalog.insert(mode.clone());
        }
        Ok(catalog)
    }

    fn insert(&mut self, mode: Mode) {
        if !self.modes.contains_key(&mode.id) {
            self.order.push(mode.id.clone());
        }
        self.modes.insert(mode.id.clone(), mode);
    }

    pub fn get(&self, id: &str) -> Result<&Mode, ModeError> {
        self.modes
            .get(id)
            .ok_or_else(|| ModeError::UnknownMode(id.to_string()))
    }

    pub fn default_mode(&self) -> &Mode {
        // balance is always inserted by builtin()
        &self.modes[DEFAULT_MODE_ID]
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mode> {
        self.order.iter().filter_map(|id| self.modes.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for ModeCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
