//! Runtime configuration and filesystem paths.
//!
//! Everything lives under ~/.courtwatch. A missing or malformed config file
//! falls back to defaults so the daemon always starts.

use crate::error::WatchError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_BASE_URL: &str = "https://www.itftennis.com/tennis/api";
const DEFAULT_TIMEOUT_SECS: u64 = 9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    pub poll_interval_secs: u64,
    pub upstream: UpstreamConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct NotifyConfig {
    pub icon: Option<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            upstream: UpstreamConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl WatchConfig {
    /// Loads the config file, falling back to defaults when it is missing or
    /// unreadable. Malformed files are logged, not fatal.
    pub fn load() -> Self {
        let Some(path) = config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to load config; using defaults");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, WatchError> {
        let raw = fs_err::read_to_string(path).map_err(|err| WatchError::Io {
            context: format!("reading {}", path.display()),
            source: err,
        })?;
        toml::from_str(&raw).map_err(|err| WatchError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_secs.max(1))
    }
}

/// Returns the courtwatch home directory (~/.courtwatch).
pub fn watch_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".courtwatch"))
}

pub fn config_path() -> Option<PathBuf> {
    watch_dir().map(|dir| dir.join("config.toml"))
}

pub fn socket_path() -> Option<PathBuf> {
    watch_dir().map(|dir| dir.join("daemon.sock"))
}

pub fn db_path() -> Option<PathBuf> {
    watch_dir().map(|dir| dir.join("daemon").join("tasks.db"))
}

pub fn log_dir() -> Option<PathBuf> {
    watch_dir().map(|dir| dir.join("logs"))
}
