//! Service configuration.
//!
//! Configuration is a small TOML document. Every field has a default, so an
//! empty or missing file is a valid configuration. Environment variables are
//! applied on top of whatever the file provides.
//!
//! # Example configuration
//!
//! ```toml
//! [database]
//! filename = "stash.db"
//!
//! [storage]
//! folder = "storage"
//!
//! [drain]
//! queue_capacity = 16
//!
//! [shutdown]
//! grace_period = "30s"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Environment override for [`DatabaseConfig::filename`].
pub const ENV_DATABASE_FILENAME: &str = "STASH_DATABASE_FILENAME";
/// Environment override for [`StorageConfig::folder`].
pub const ENV_STORAGE_FOLDER: &str = "STASH_STORAGE_FOLDER";
/// Environment override for [`DrainConfig::queue_capacity`].
pub const ENV_DRAIN_QUEUE_CAPACITY: &str = "STASH_DRAIN_QUEUE_CAPACITY";
/// Environment override for [`ShutdownConfig::grace_period`].
pub const ENV_SHUTDOWN_GRACE_PERIOD: &str = "STASH_SHUTDOWN_GRACE_PERIOD";

const DEFAULT_DATABASE_FILENAME: &str = "stash.db";
const DEFAULT_STORAGE_FOLDER: &str = "storage";
const DEFAULT_QUEUE_CAPACITY: usize = 16;
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Errors from loading, validating or saving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write config file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidOverride {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StashConfig {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub drain: DrainConfig,
    pub shutdown: ShutdownConfig,
}

/// Where the snapshot lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub filename: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            filename: PathBuf::from(DEFAULT_DATABASE_FILENAME),
        }
    }
}

/// Root folder for uploaded bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub folder: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from(DEFAULT_STORAGE_FOLDER),
        }
    }
}

/// Deletion pipeline sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainConfig {
    /// Number of deleted records that may wait for physical removal.
    pub queue_capacity: usize,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Shutdown timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long in-flight requests get to finish once shutdown starts.
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl StashConfig {
    /// Load configuration from `path` (if given and present), then apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without applying overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write this configuration to `path` as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(path, content).map_err(write_err)
    }

    /// Apply overrides from a variable lookup (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_DATABASE_FILENAME) {
            self.database.filename = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_STORAGE_FOLDER) {
            self.storage.folder = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_DRAIN_QUEUE_CAPACITY) {
            self.drain.queue_capacity =
                value
                    .trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::InvalidOverride {
                        var: ENV_DRAIN_QUEUE_CAPACITY,
                        value: value.clone(),
                        reason: e.to_string(),
                    })?;
        }
        if let Some(value) = lookup(ENV_SHUTDOWN_GRACE_PERIOD) {
            self.shutdown.grace_period = humantime_serde::re::humantime::parse_duration(
                value.trim(),
            )
            .map_err(|e| ConfigError::InvalidOverride {
                var: ENV_SHUTDOWN_GRACE_PERIOD,
                value: value.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.drain.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "drain.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.database.filename.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "database.filename must not be empty".to_string(),
            ));
        }
        if self.storage.folder.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "storage.folder must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
