//! Configuration management
//!
//! Settings are layered, later sources win:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables
//!
//! # Usage
//!
//! ```no_run
//! use partitioner::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Reconciling every {}", config.runner.period);
//! ```
//!
//! # Environment Variables
//!
//! Scalar settings can be overridden with `PARTITIONER__<section>__<key>`:
//! - `PARTITIONER__RUNNER__PERIOD=1h`
//! - `PARTITIONER__DATABASE__MAX_CONNECTIONS=8`
//!
//! `DATABASE_URL` is used when no `database.url` is configured.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/partitioner.toml`.
//! This can be overridden using the `PARTITIONER_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::HumanDuration;
pub use models::{Config, DatabaseConfig, RunnerSettings, TableConfig};
pub use validation::ValidationError;

use crate::partitioner::Partitioner;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("No database URL configured (set database.url or DATABASE_URL)")]
    MissingDatabaseUrl,
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// One partitioner per configured table, in file order
    pub fn partitioners(&self) -> Vec<Partitioner> {
        self.tables.iter().map(TableConfig::to_partitioner).collect()
    }

    #[cfg(feature = "postgres")]
    pub fn postgres_options(&self) -> Result<crate::driver::PostgresOptions, ConfigError> {
        let url = self
            .database
            .url
            .clone()
            .ok_or(ConfigError::MissingDatabaseUrl)?;

        Ok(crate::driver::PostgresOptions::builder()
            .url(url)
            .max_connections(self.database.max_connections)
            .acquire_timeout(self.database.acquire_timeout.as_duration())
            .tolerate_existing(self.database.tolerate_existing)
            .build())
    }
}
