//! Configuration for the undo engine
//!
//! Holds the undo window, the toast auto-hide delay and where the event
//! archive lives. Values come from defaults, builder-style setters or the
//! process environment.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::event::DEFAULT_AUTO_HIDE_MS;
use crate::{Result, UndoError};

/// Default undo window: five minutes
pub const DEFAULT_TTL_SECONDS: u64 = 300;

pub const ENV_TTL_SECONDS: &str = "UNDEL_TTL_SECONDS";
pub const ENV_AUTO_HIDE_MS: &str = "UNDEL_AUTO_HIDE_MS";
pub const ENV_ARCHIVE_PATH: &str = "UNDEL_ARCHIVE_PATH";

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoConfig {
    /// How long a deletion stays restorable, in seconds
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    /// Toast auto-hide delay in milliseconds
    #[serde(default = "default_auto_hide_ms")]
    pub auto_hide_after_ms: u64,
    /// Event archive location used by the CLI (optional)
    #[serde(default)]
    pub archive_path: Option<PathBuf>,
}

fn default_ttl_seconds() -> u64 {
    DEFAULT_TTL_SECONDS
}

fn default_auto_hide_ms() -> u64 {
    DEFAULT_AUTO_HIDE_MS
}

impl UndoConfig {
    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    pub fn with_auto_hide_after_ms(mut self, auto_hide_after_ms: u64) -> Self {
        self.auto_hide_after_ms = auto_hide_after_ms;
        self
    }

    pub fn with_archive_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.archive_path = Some(path.into());
        self
    }

    /// The undo window as a signed duration
    pub fn ttl(&self) -> chrono::Duration {
        i64::try_from(self.ttl_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Build a configuration from defaults overridden by `UNDEL_*` variables
    ///
    /// # Errors
    /// * `UndoError::Config` - If a variable is set but not a valid value
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_TTL_SECONDS) {
            config.ttl_seconds = parse_u64(ENV_TTL_SECONDS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_AUTO_HIDE_MS) {
            config.auto_hide_after_ms = parse_u64(ENV_AUTO_HIDE_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_ARCHIVE_PATH) {
            if !raw.trim().is_empty() {
                config.archive_path = Some(PathBuf::from(raw.trim()));
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let representable = i64::try_from(self.ttl_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .is_some();
        if !representable {
            return Err(UndoError::config(format!(
                "ttl_seconds {} is out of range",
                self.ttl_seconds
            )));
        }
        if let Some(path) = &self.archive_path {
            if path.as_os_str().is_empty() {
                return Err(UndoError::config("archive_path cannot be empty"));
            }
        }
        Ok(())
    }
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_TTL_SECONDS,
            auto_hide_after_ms: DEFAULT_AUTO_HIDE_MS,
            archive_path: None,
        }
    }
}

fn parse_u64(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|_| UndoError::config(format!("{name} must be a non-negative integer, got '{raw}'")))
}
