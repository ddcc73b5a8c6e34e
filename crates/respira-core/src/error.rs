//! Core error types for respira-core.
//!
//! This module defines the error hierarchy using thiserror.
//! `SessionEngine::start` only returns `InvalidMode`, `InvalidDuration` or
//! `AlreadyRunning`; resource and persistence failures during a session are
//! logged inside the engine.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for respira-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed phase/duration arrays
    #[error("Invalid mode: {0}")]
    InvalidMode(#[from] ModeError),

    /// Session length of zero seconds
    #[error("Invalid session duration: total seconds must be positive")]
    InvalidDuration,

    /// A session is already running on this engine
    #[error("A session is already running")]
    AlreadyRunning,

    /// Wake lock, audio or haptics unavailable or denied
    #[error("{resource} unavailable: {message}")]
    ResourceUnavailable { resource: String, message: String },

    /// Stats load/save failures
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn unavailable(resource: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::ResourceUnavailable {
            resource: resource.into(),
            message: message.into(),
        }
    }
}

/// Mode validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModeError {
    /// No phases at all
    #[error("mode has no phases")]
    Empty,

    /// `phases` and `durations_ms` are not index-aligned
    #[error("mode has {phases} phases but {durations} durations")]
    LengthMismatch { phases: usize, durations: usize },

    /// A phase with a zero-length duration would spin the sequencer
    #[error("phase {index} has a zero duration")]
    ZeroDuration { index: usize },

    /// Lookup by id failed
    #[error("unknown mode: {0}")]
    UnknownMode(String),
}

/// Stats persistence errors.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Failed to open the backing store
    #[error("Failed to open stats store at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored record could not be encoded or decoded
    #[error("Stats record is malformed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Any other load failure (e.g. data dir unavailable)
    #[error("Failed to load stats: {0}")]
    Load(String),

    /// Any other save failure
    #[error("Failed to save stats: {0}")]
    Save(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown dot-path key
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_error_converts_into_core_error() {
        let err: CoreError = ModeError::Empty.into();
        assert!(matches!(err, CoreError::InvalidMode(ModeError::Empty)));
        assert_eq!(err.to_string(), "Invalid mode: mode has no phases");
    }

    #[test]
    fn resource_unavailable_message() {
        let err = CoreError::unavailable("wake lock", "denied");
        assert_eq!(err.to_string(), "wake lock unavailable: denied");
    }
}
