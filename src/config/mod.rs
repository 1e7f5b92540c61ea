//! Configuration management for uplink
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use uplink::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("State directory: {}", config.storage.data_dir.display());
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `UPLINK__<section>__<key>`
//!
//! Examples:
//! - `UPLINK__TRANSPORT__PROVIDER=http`
//! - `UPLINK__TRANSPORT__BASE_URL=https://api.example.com`
//! - `UPLINK__QUEUE__MAX_CONCURRENT_UPLOADS=8`
//!
//! The bearer token is read only from `UPLINK_AUTH_TOKEN`.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/uplink.toml`.
//! This can be overridden using the `UPLINK_CONFIG` environment variable.
//!
//! The background session identifier, queue name and deletion retry budget
//! are constants of [`crate::coordinator`] and cannot be configured.

mod models;
mod sources;
mod validation;

pub use models::{
    Config, DeletionConfig, QueueConfig, StorageConfig, TransportConfig, TransportProvider,
};
pub use validation::ValidationError;

use std::time::Duration;

use thiserror::Error;

use crate::coordinator::CoordinatorOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`UPLINK__*`)
    /// 2. TOML file (default: `config/uplink.toml`)
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file is malformed
    /// - Validation fails (missing base url, zero concurrency, etc.)
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path, plus environment and secrets
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_with_secrets(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Coordinator tuning derived from this configuration
    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            max_concurrent_uploads: self.queue.max_concurrent_uploads,
            deletion_backoff: Duration::from_millis(self.deletion.backoff_base_ms),
        }
    }
}
