//! Configuration types for polling, batch retention, and the media API.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted when no API key is configured.
const ENV_API_KEY: &str = "GRID_API_KEY";

/// Complete engine configuration.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct UpdatesConfig {
    /// Default polling strategy for reconciliation
    #[serde(default)]
    pub polling: PollingConfig,
    /// Retention of settled batches
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Media API endpoints and credentials
    #[serde(default)]
    pub media: MediaConfig,
}

/// How the interval between poll attempts evolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStrategy {
    /// Constant interval
    Fixed,
    /// Interval grows by `backoff_multiplier` after each attempt
    Exponential,
}

/// Polling configuration for one reconciliation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Interval strategy
    pub strategy: PollStrategy,
    /// Delay before the first poll, in milliseconds
    pub interval_ms: u64,
    /// Number of polls before giving up
    pub max_attempts: u32,
    /// Growth factor for the exponential strategy
    pub backoff_multiplier: f64,
    /// Upper bound on the interval for the exponential strategy, in milliseconds
    pub max_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            strategy: PollStrategy::Fixed,
            interval_ms: 500,
            max_attempts: 10,
            backoff_multiplier: 1.5,
            max_interval_ms: 10_000,
        }
    }
}

impl PollingConfig {
    /// Exponential backoff starting at `interval_ms`.
    #[must_use]
    pub fn exponential(interval_ms: u64, max_attempts: u32, max_interval_ms: u64) -> Self {
        Self {
            strategy: PollStrategy::Exponential,
            interval_ms,
            max_attempts,
            max_interval_ms,
            ..Self::default()
        }
    }

    /// Delay before the first poll.
    #[must_use]
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Delay to use after an unconfirmed attempt that waited `current`.
    #[must_use]
    pub fn next_interval(&self, current: Duration) -> Duration {
        match self.strategy {
            PollStrategy::Fixed => current,
            PollStrategy::Exponential => {
                let max = Duration::from_millis(self.max_interval_ms);
                Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff_multiplier)
                    .map_or(max, |grown| grown.min(max))
            }
        }
    }

    /// Check the values are usable.
    ///
    /// # Errors
    /// Returns an error if there are no attempts or the multiplier would shrink the interval.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "polling.max_attempts must be at least 1".to_owned(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::Config(
                "polling.backoff_multiplier must be a finite number >= 1.0".to_owned(),
            ));
        }
        Ok(())
    }
}

/// How many settled batches stay queryable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Settled batches beyond this count are evicted oldest-first
    pub max_settled_batches: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_settled_batches: 100,
        }
    }
}

/// Media API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Base URL of the media API
    pub api_base_url: String,
    /// Base URL of the leases API, derived from `api_base_url` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leases_base_url: Option<String>,
    /// API key sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.media.local.dev-gutools.co.uk".to_owned(),
            leases_base_url: None,
            api_key: None,
            request_timeout_secs: 30,
        }
    }
}

impl MediaConfig {
    /// Leases API base URL.
    #[must_use]
    pub fn leases_url(&self) -> String {
        self.leases_base_url.clone().unwrap_or_else(|| {
            self.api_base_url
                .trim_end_matches('/')
                .replacen("media.", "media-leases.", 1)
        })
    }

    /// Get the API key, checking config first, then the environment
    pub fn api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| env::var(ENV_API_KEY).ok())
    }

    /// Per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl UpdatesConfig {
    /// Get the default config directory path (`~/.grid`)
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined
    pub fn config_dir() -> Result<PathBuf> {
        use dirs::home_dir;
        let home = home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_owned()))?;
        Ok(home.join(".grid"))
    }

    /// Get the default config file path (`~/.grid/config.toml`)
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load config from the default location, creating it with defaults if missing
    ///
    /// # Errors
    /// Returns an error if the config cannot be read or created
    pub fn load_or_create() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            let config = Self::default();
            config.save_to_file(&config_path)?;
            Ok(config)
        }
    }

    /// Load config from a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or fails validation
    pub fn load_from_file(path: &Path) -> Result<Self> {
        use toml::from_str;
        let contents = fs::read_to_string(path)?;
        let config: Self = from_str(&contents)?;
        config.polling.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save config to a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be written
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        use toml::to_string_pretty;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = to_string_pretty(self)?;

        let header = "# Grid update engine configuration\n\
                      # This file is automatically generated on first run\n\n";

        fs::write(path, format!("{header}{contents}"))?;

        Ok(())
    }
}
