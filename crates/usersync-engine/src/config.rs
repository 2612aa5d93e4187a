//! Engine configuration.
//!
//! Values can be deserialized (every field has a default) or loaded from
//! environment variables:
//!
//! - `USERSYNC_CHECKPOINT_INTERVAL` - users processed between checkpoints (default: 20)
//! - `USERSYNC_USER_BATCH` - default users fetched per listing call (default: 500)
//! - `USERSYNC_LEASE_TTL_SECS` - lifetime of the per-run lease (default: 300)

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Variable present but not parseable.
    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    /// Value parsed but outside the accepted range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Persist the run state every N processed users.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,
    /// Users fetched per listing call when a run does not set its own batch size.
    #[serde(default = "default_user_batch")]
    pub default_user_batch: usize,
    /// Seconds before an unreleased run lease expires.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

fn default_checkpoint_interval() -> usize {
    20
}

fn default_user_batch() -> usize {
    500
}

fn default_lease_ttl_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: default_checkpoint_interval(),
            default_user_batch: default_user_batch(),
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// A `.env` file in the working directory is read first when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let config = Self {
            checkpoint_interval: parse_var(
                "USERSYNC_CHECKPOINT_INTERVAL",
                default_checkpoint_interval(),
            )?,
            default_user_batch: parse_var("USERSYNC_USER_BATCH", default_user_batch())?,
            lease_ttl_secs: parse_var("USERSYNC_LEASE_TTL_SECS", default_lease_ttl_secs())?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.checkpoint_interval == 0 {
            return Err(ConfigError::Invalid(
                "checkpoint_interval must be at least 1".to_string(),
            ));
        }
        if self.default_user_batch == 0 {
            return Err(ConfigError::Invalid(
                "default_user_batch must be at least 1".to_string(),
            ));
        }
        if self.lease_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "lease_ttl_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Lease lifetime as a Duration.
    #[must_use]
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }
}

fn parse_var<T>(var: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: var.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
