//! Configuration loading and persistence.
//!
//! A small JSON file plus environment overrides. The worker itself only reads
//! `max_message_size`; `stop_timeout_secs` is consumed by owners that want a
//! bounded shutdown.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::fs;

use crate::constants::{
    DEFAULT_MAX_MESSAGE_SIZE, ENV_MAX_MESSAGE_SIZE, ENV_STOP_TIMEOUT_SECS, MAX_MESSAGE_SIZE_LIMIT,
};
use crate::error::TransportError;

/// Configuration for a duplex transport worker.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Receive buffer capacity; the largest payload a single `Inbound` can carry.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Bound on how long `stop` waits for the read loop. `None` waits forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_timeout_secs: Option<u64>,
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            stop_timeout_secs: None,
        }
    }
}

impl Config {
    /// Default config file location: `<platform config dir>/duplex-link/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("duplex-link").join("config.json"))
    }

    /// Load configuration.
    ///
    /// Source priority:
    /// 1. `path`, when given (must exist and parse)
    /// 2. [`Config::default_path`], when that file exists
    /// 3. built-in defaults
    ///
    /// Environment overrides are applied afterwards, then the result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::load_from_file(&default)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without applying overrides.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Write the config as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config dir: {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents).with_context(|| format!("write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `DUPLEX_LINK_*` environment overrides.
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var(ENV_MAX_MESSAGE_SIZE) {
            self.max_message_size = value
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MAX_MESSAGE_SIZE} must be an integer, got {value:?}"))?;
        }
        if let Ok(value) = std::env::var(ENV_STOP_TIMEOUT_SECS) {
            let secs: u64 = value
                .trim()
                .parse()
                .with_context(|| format!("{ENV_STOP_TIMEOUT_SECS} must be an integer, got {value:?}"))?;
            // 0 means "wait forever", same as leaving it unset.
            self.stop_timeout_secs = (secs > 0).then_some(secs);
        }
        Ok(())
    }

    /// Check ranges.
    pub fn validate(&self) -> std::result::Result<(), TransportError> {
        if self.max_message_size == 0 || self.max_message_size > MAX_MESSAGE_SIZE_LIMIT {
            return Err(TransportError::InvalidConfig(format!(
                "max_message_size must be between 1 and {MAX_MESSAGE_SIZE_LIMIT}, got {}",
                self.max_message_size
            )));
        }
        if self.stop_timeout_secs == Some(0) {
            return Err(TransportError::InvalidConfig(
                "stop_timeout_secs must be positive; omit it to wait indefinitely".to_owned(),
            ));
        }
        Ok(())
    }

    /// `stop_timeout_secs` as a `Duration`.
    pub fn stop_timeout(&self) -> Option<Duration> {
        self.stop_timeout_secs.map(Duration::from_secs)
    }
}
