//! Pipeline configuration.
//!
//! Loaded from a TOML file (every key optional, defaults below), then
//! optionally overridden from `CRYPTOCAST_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// All tunables for the market data and forecast pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Timer period for scheduled refreshes of each asset.
    pub refresh_interval_secs: u64,

    /// Age after which cached data is considered stale.
    pub staleness_threshold_secs: u64,

    /// Upper bound on exponential backoff between failed refreshes.
    pub max_backoff_secs: u64,

    /// Consecutive failures tolerated before backoff starts.
    pub failures_before_backoff: u32,

    /// Points older than this many days are trimmed.
    pub retention_days: u32,

    /// Hard cap on retained points per asset.
    pub max_points: usize,

    /// Hard timeout for each upstream HTTP call.
    pub request_timeout_secs: u64,

    /// Upstream request budget shared across all assets.
    pub requests_per_minute: u32,

    /// Look-back for the first fetch of an asset.
    pub initial_history_days: u32,

    pub provider_base_url: String,
    pub vs_currency: String,

    /// Directory holding one model artifact per asset.
    pub model_dir: PathBuf,

    /// Cooldown after the upstream blocks us (HTTP 403).
    pub breaker_cooldown_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 300,
            staleness_threshold_secs: 900,
            max_backoff_secs: 3600,
            failures_before_backoff: 3,
            retention_days: 730,
            max_points: 1000,
            request_timeout_secs: 25,
            requests_per_minute: 10,
            initial_history_days: 365,
            provider_base_url: "https://api.coingecko.com/api/v3".to_string(),
            vs_currency: "usd".to_string(),
            model_dir: PathBuf::from("models"),
            breaker_cooldown_secs: 30 * 60,
        }
    }
}

impl PipelineConfig {
    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CRYPTOCAST_<KEY>` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn set<T, F>(slot: &mut T, key: &str, lookup: &F) -> Result<(), ConfigError>
        where
            T: std::str::FromStr,
            F: Fn(&str) -> Option<String>,
        {
            if let Some(value) = lookup(key) {
                *slot = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    key: key.to_string(),
                    value,
                })?;
            }
            Ok(())
        }

        set(&mut self.refresh_interval_secs, "CRYPTOCAST_REFRESH_INTERVAL_SECS", &lookup)?;
        set(&mut self.staleness_threshold_secs, "CRYPTOCAST_STALENESS_THRESHOLD_SECS", &lookup)?;
        set(&mut self.max_backoff_secs, "CRYPTOCAST_MAX_BACKOFF_SECS", &lookup)?;
        set(&mut self.failures_before_backoff, "CRYPTOCAST_FAILURES_BEFORE_BACKOFF", &lookup)?;
        set(&mut self.retention_days, "CRYPTOCAST_RETENTION_DAYS", &lookup)?;
        set(&mut self.max_points, "CRYPTOCAST_MAX_POINTS", &lookup)?;
        set(&mut self.request_timeout_secs, "CRYPTOCAST_REQUEST_TIMEOUT_SECS", &lookup)?;
        set(&mut self.requests_per_minute, "CRYPTOCAST_REQUESTS_PER_MINUTE", &lookup)?;
        set(&mut self.initial_history_days, "CRYPTOCAST_INITIAL_HISTORY_DAYS", &lookup)?;
        set(&mut self.breaker_cooldown_secs, "CRYPTOCAST_BREAKER_COOLDOWN_SECS", &lookup)?;

        if let Some(v) = lookup("CRYPTOCAST_PROVIDER_BASE_URL") {
            self.provider_base_url = v;
        }
        if let Some(v) = lookup("CRYPTOCAST_VS_CURRENCY") {
            self.vs_currency = v;
        }
        if let Some(v) = lookup("CRYPTOCAST_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("refresh_interval_secs", self.refresh_interval_secs),
            ("staleness_threshold_secs", self.staleness_threshold_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("requests_per_minute", u64::from(self.requests_per_minute)),
            ("retention_days", u64::from(self.retention_days)),
            ("initial_history_days", u64::from(self.initial_history_days)),
            ("max_points", self.max_points as u64),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{key} must be greater than zero")));
        }
        if self.max_backoff_secs < self.refresh_interval_secs {
            return Err(ConfigError::Invalid(format!(
                "max_backoff_secs ({}) must be at least refresh_interval_secs ({})",
                self.max_backoff_secs, self.refresh_interval_secs
            )));
        }
        if self.provider_base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("provider_base_url is empty".into()));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }

    /// Minimum spacing between upstream requests implied by the budget.
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_secs(60) / self.requests_per_minute.max(1)
    }
}
