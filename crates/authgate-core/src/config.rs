//! Client configuration.
//!
//! Loaded from `~/.config/authgate/config.json` when present, then
//! overridden by `AUTHGATE_*` environment variables (a `.env` file is
//! honored). Sessions are stored under `~/.cache/authgate/` by default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::gateway::REFRESH_TIMEOUT_SECS;
use crate::api::transport::REQUEST_TIMEOUT_SECS;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "authgate";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Service used when no base URL is configured
const DEFAULT_API_URL: &str = "http://localhost:3001/api";

const ENV_API_URL: &str = "AUTHGATE_API_URL";
const ENV_REQUEST_TIMEOUT: &str = "AUTHGATE_REQUEST_TIMEOUT_SECS";
const ENV_REFRESH_TIMEOUT: &str = "AUTHGATE_REFRESH_TIMEOUT_SECS";

/// Where the session snapshot lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
    pub storage: StorageBackend,
    /// Overrides the default session directory for the file backend.
    pub session_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            refresh_timeout_secs: REFRESH_TIMEOUT_SECS,
            storage: StorageBackend::default(),
            session_dir: None,
        }
    }
}

impl Config {
    /// Load the config file, falling back to defaults when it doesn't exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            Ok(serde_json::from_str(&contents).context("Failed to parse config file")?)
        } else {
            Ok(Self::default())
        }
    }

    /// `load()` plus `.env` and environment overrides.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (silently ignore if not found)
        let _ = dotenvy::dotenv();

        let mut config = Self::load()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL).filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url;
        }
        if let Some(secs) = parse_secs(ENV_REQUEST_TIMEOUT, lookup(ENV_REQUEST_TIMEOUT)) {
            self.request_timeout_secs = secs;
        }
        if let Some(secs) = parse_secs(ENV_REFRESH_TIMEOUT, lookup(ENV_REFRESH_TIMEOUT)) {
            self.refresh_timeout_secs = secs;
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn session_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.session_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}

fn parse_secs(key: &str, value: Option<String>) -> Option<u64> {
    let value = value?;
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Some(secs),
        _ => {
            warn!(key, value = %value, "Ignoring invalid timeout override");
            None
        }
    }
}
