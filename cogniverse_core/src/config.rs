//! Client configuration.
//!
//! Resolution order: defaults, then an optional TOML file, then environment
//! variables. Binaries apply their CLI flags last.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ApiError;
use crate::poller::PollerConfig;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const ENV_API_URL: &str = "COGNIVERSE_API_URL";
pub const ENV_POLL_INTERVAL_MS: &str = "COGNIVERSE_POLL_INTERVAL_MS";

/// Configuration for the API client and the simulation poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend base URL, without trailing slash
    pub base_url: String,

    /// Per-request timeout in milliseconds (default: 30000)
    pub request_timeout_ms: u64,

    /// Delay between simulation polls in milliseconds (default: 2000)
    pub poll_interval_ms: u64,

    /// Consecutive poll failures before the loop stops (default: 5)
    pub max_consecutive_failures: u32,

    /// Directory holding the persistent token store
    pub data_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            request_timeout_ms: 30_000,
            poll_interval_ms: 2_000,
            max_consecutive_failures: 5,
            data_dir: None,
        }
    }
}

impl ClientConfig {
    /// Parses a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ApiError> {
        let config: Self =
            toml::from_str(source).map_err(|e| ApiError::Config(format!("Invalid config: {}", e)))?;
        config.validate()
    }

    /// Loads a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ApiError> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| ApiError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// Rejects settings the poller cannot run with.
    pub fn validate(self) -> Result<Self, ApiError> {
        if self.poll_interval_ms == 0 {
            return Err(ApiError::Config("poll_interval_ms must be at least 1".to_string()));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ApiError::Config("max_consecutive_failures must be at least 1".to_string()));
        }
        Ok(self)
    }

    /// Applies environment variable overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup (environment in production).
    ///
    /// An interval of zero is ignored like any other unusable value.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(ENV_API_URL).filter(|url| !url.trim().is_empty()) {
            self.base_url = url;
        }
        if let Some(ms) = lookup(ENV_POLL_INTERVAL_MS)
            .and_then(|ms| ms.parse().ok())
            .filter(|&ms| ms > 0)
        {
            self.poll_interval_ms = ms;
        }
        self.base_url = self.base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Poller settings derived from this config.
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }

    /// Path of the token database inside the data directory.
    pub fn token_store_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join("tokens"))
    }
}
