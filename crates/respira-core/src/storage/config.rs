//! TOML-based application configuration.
//!
//! Stores user preferences including:
//! - Default mode and session length
//! - Lead-in delay before the first phase
//! - Cue preferences (terminal bell, haptics)
//! - Custom breathing modes
//!
//! Configuration is stored at `~/.config/respira/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::engine::SessionConfig;
use crate::error::{ConfigError, CoreError, Result};
use crate::mode::{Mode, ModeCatalog, DEFAULT_MODE_ID};

/// Upper bound on the lead-in delay.
pub const MAX_LEAD_IN_MS: u64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDefaults {
    #[serde(default = "default_mode")]
    pub default_mode: String,
    #[serde(default = "default_duration_secs")]
    pub default_duration_secs: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay between `start` and the first phase, so the presentation layer
    /// can settle (wake lock, view transition).
    #[serde(default = "default_lead_in_ms")]
    pub lead_in_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuesConfig {
    #[serde(default = "default_true")]
    pub bell: bool,
    #[serde(default = "default_true")]
    pub haptics: bool,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/respira/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_modes: Vec<Mode>,
    #[serde(default)]
    pub session: SessionDefaults,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub cues: CuesConfig,
}

fn default_mode() -> String {
    DEFAULT_MODE_ID.into()
}
fn default_duration_secs() -> u32 {
    180
}
fn default_lead_in_ms() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            default_mode: default_mode(),
            default_duration_secs: default_duration_secs(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lead_in_ms: default_lead_in_ms(),
        }
    }
}

impl Default for CuesConfig {
    fn default() -> Self {
        Self {
            bell: true,
            haptics: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            custom_modes: Vec::new(),
            session: SessionDefaults::default(),
            engine: EngineConfig::default(),
            cues: CuesConfig::default(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_some() {
                current = current.get_mut(part).ok_or_else(unknown)?;
                continue;
            }

            let obj = current.as_object_mut().ok_or_else(unknown)?;
            let existing = obj.get(part).ok_or_else(unknown)?;

            let new_value = match existing {
                serde_json::Value::Bool(_) => serde_json::Value::Bool(
                    value
                        .parse::<bool>()
                        .map_err(|e| invalid(e.to_string()))?,
                ),
                serde_json::Value::Number(_) => value
                    .parse::<u64>()
                    .map(|n| serde_json::Value::Number(n.into()))
                    .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?,
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                    serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                }
                _ => serde_json::Value::String(value.into()),
            };

            obj.insert(part.to_string(), new_value);
            return Ok(());
        }

        Err(unknown())
    }

    fn path() -> Result<PathBuf> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk or return default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(_) => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
        }
    }

    /// Persist to disk.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Load from disk, returning default on error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default config");
            Self::default()
        })
    }

    /// Check values that serde defaults cannot guard.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.default_duration_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "session.default_duration_secs".into(),
                message: "must be positive".into(),
            });
        }
        if self.engine.lead_in_ms > MAX_LEAD_IN_MS {
            return Err(ConfigError::InvalidValue {
                key: "engine.lead_in_ms".into(),
                message: format!("must be at most {MAX_LEAD_IN_MS}"),
            });
        }
        for mode in &self.custom_modes {
            mode.validate().map_err(|e| ConfigError::InvalidValue {
                key: format!("custom_modes.{}", mode.id),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving. Returns error if the key is
    /// unknown or the resulting config is invalid.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let mut json = serde_json::to_value(&*self)?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json)?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Set a config value by key and persist.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.apply(key, value)?;
        self.save()
    }

    pub fn mode_catalog(&self) -> Result<ModeCatalog> {
        Ok(ModeCatalog::with_custom(&self.custom_modes)?)
    }

    /// Resolve a session from optional overrides and the stored defaults.
    pub fn session_config(
        &self,
        mode_id: Option<&str>,
        total_secs: Option<u32>,
    ) -> Result<SessionConfig> {
        let catalog = self.mode_catalog()?;
        let mode = catalog
            .get(mode_id.unwrap_or(self.session.default_mode.as_str()))?
            .clone();
        let total_secs = total_secs.unwrap_or(self.session.default_duration_secs);
        if total_secs == 0 {
            return Err(CoreError::InvalidDuration);
        }
        Ok(SessionConfig { mode, total_secs })
    }
}
