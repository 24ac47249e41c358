//! Configuration management for convsync
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{ConvsyncError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for convsync
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Local store settings
    #[serde(default)]
    pub store: StoreConfig,
    /// Read cache settings
    #[serde(default)]
    pub cache: CacheConfig,
    /// Deadlines and retry settings for store calls
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Input limits enforced before writes
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path; the platform data directory when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum age of a cached record, in seconds
    #[serde(default = "default_freshness_seconds")]
    pub freshness_seconds: u64,

    /// Maximum number of cached records
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_freshness_seconds() -> u64 {
    60
}

fn default_max_entries() -> usize {
    256
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            freshness_seconds: default_freshness_seconds(),
            max_entries: default_max_entries(),
        }
    }
}

impl CacheConfig {
    /// Freshness window as a duration
    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_seconds)
    }
}

/// Remote call configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Deadline for each store call, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Total read attempts, including the first
    #[serde(default = "default_read_attempts")]
    pub read_attempts: u32,

    /// First backoff delay, in milliseconds
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Backoff cap, in milliseconds
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_read_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    2_000
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            read_attempts: default_read_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RemoteConfig {
    /// Per-call deadline as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Input limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum conversation id length, in bytes
    #[serde(default = "default_max_id_length")]
    pub max_id_length: usize,

    /// Maximum title length, in characters
    #[serde(default = "default_max_title_length")]
    pub max_title_length: usize,

    /// Maximum serialized context size, in bytes
    #[serde(default = "default_max_context_bytes")]
    pub max_context_bytes: usize,

    /// Maximum number of messages per conversation
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

fn default_max_id_length() -> usize {
    128
}

fn default_max_title_length() -> usize {
    200
}

fn default_max_context_bytes() -> usize {
    64 * 1024
}

fn default_max_messages() -> usize {
    5_000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_id_length: default_max_id_length(),
            max_title_length: default_max_title_length(),
            max_context_bytes: default_max_context_bytes(),
            max_messages: default_max_messages(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConvsyncError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ConvsyncError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(db) = std::env::var(crate::storage::sqlite::DB_PATH_ENV) {
            if !db.trim().is_empty() {
                self.store.path = Some(PathBuf::from(db));
            }
        }

        if let Ok(freshness) = std::env::var("CONVSYNC_CACHE_FRESHNESS_SECONDS") {
            if let Ok(value) = freshness.parse() {
                self.cache.freshness_seconds = value;
            } else {
                tracing::warn!("Invalid CONVSYNC_CACHE_FRESHNESS_SECONDS: {}", freshness);
            }
        }

        if let Ok(timeout) = std::env::var("CONVSYNC_REMOTE_TIMEOUT_MS") {
            if let Ok(value) = timeout.parse() {
                self.remote.timeout_ms = value;
            } else {
                tracing::warn!("Invalid CONVSYNC_REMOTE_TIMEOUT_MS: {}", timeout);
            }
        }

        if let Ok(attempts) = std::env::var("CONVSYNC_READ_ATTEMPTS") {
            if let Ok(value) = attempts.parse() {
                self.remote.read_attempts = value;
            } else {
                tracing::warn!("Invalid CONVSYNC_READ_ATTEMPTS: {}", attempts);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(db) = &cli.db {
            tracing::debug!("Using database override from CLI: {}", db.display());
            self.store.path = Some(db.clone());
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any value is outside its accepted range
    pub fn validate(&self) -> Result<()> {
        if !(1..=3_600).contains(&self.cache.freshness_seconds) {
            return Err(ConvsyncError::Config(
                "cache.freshness_seconds must be between 1 and 3600".to_string(),
            )
            .into());
        }

        if self.cache.max_entries == 0 {
            return Err(ConvsyncError::Config(
                "cache.max_entries must be greater than 0".to_string(),
            )
            .into());
        }

        if !(1..=60_000).contains(&self.remote.timeout_ms) {
            return Err(ConvsyncError::Config(
                "remote.timeout_ms must be between 1 and 60000".to_string(),
            )
            .into());
        }

        if !(1..=10).contains(&self.remote.read_attempts) {
            return Err(ConvsyncError::Config(
                "remote.read_attempts must be between 1 and 10".to_string(),
            )
            .into());
        }

        if self.remote.backoff_max_ms < self.remote.backoff_base_ms {
            return Err(ConvsyncError::Config(
                "remote.backoff_max_ms must be at least remote.backoff_base_ms".to_string(),
            )
            .into());
        }

        let limits = &self.limits;
        if limits.max_id_length == 0
            || limits.max_title_length == 0
            || limits.max_context_bytes == 0
            || limits.max_messages == 0
        {
            return Err(
                ConvsyncError::Config("limits must all be greater than 0".to_string()).into(),
            );
        }

        Ok(())
    }
}
