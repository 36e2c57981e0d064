//! Hierarchical configuration loader.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::HiveConfig;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_workers: {0}. Must be between 0 and 100")]
    InvalidMaxWorkers(usize),

    #[error("Invalid quorum: {0}. Must be within (0, 1]")]
    InvalidQuorum(f64),

    #[error("Invalid consensus timeout: {0} ms. Must be positive")]
    InvalidConsensusTimeout(u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid memory bound: {0}. Cache entry and memory bounds must be positive")]
    InvalidMemoryBound(usize),

    #[error("Invalid message buffer capacity: {0}. Must be at least 1")]
    InvalidBufferCapacity(usize),

    #[error("Invalid autosave interval: {0} s. Must be positive")]
    InvalidSaveInterval(u64),
}

/// Loader merging defaults, the project config file, and environment
/// variables.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `.hive-mind/config.json` (created by `init`)
    /// 3. Environment variables (`HIVEMIND_*` prefix)
    pub fn load() -> Result<HiveConfig> {
        let config: HiveConfig = Figment::new()
            .merge(Serialized::defaults(HiveConfig::default()))
            .merge(Json::file(".hive-mind/config.json"))
            .merge(Env::prefixed("HIVEMIND_").split("__"))
            .extract()
            .context("Failed to extract configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from an explicit file path.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<HiveConfig> {
        let config: HiveConfig = Figment::new()
            .merge(Serialized::defaults(HiveConfig::default()))
            .merge(Json::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &HiveConfig) -> Result<(), ConfigError> {
        // max_workers = 0 is legal: tasks stay pending and autoscale is a
        // no-op.
        if config.max_workers > 100 {
            return Err(ConfigError::InvalidMaxWorkers(config.max_workers));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if !(config.consensus.quorum > 0.0 && config.consensus.quorum <= 1.0) {
            return Err(ConfigError::InvalidQuorum(config.consensus.quorum));
        }
        if config.consensus.timeout_ms == 0 {
            return Err(ConfigError::InvalidConsensusTimeout(config.consensus.timeout_ms));
        }

        if config.memory.max_entries == 0 {
            return Err(ConfigError::InvalidMemoryBound(config.memory.max_entries));
        }
        if config.memory.max_memory_mb == 0 {
            return Err(ConfigError::InvalidMemoryBound(config.memory.max_memory_mb));
        }

        if config.messaging.buffer_capacity == 0 {
            return Err(ConfigError::InvalidBufferCapacity(
                config.messaging.buffer_capacity,
            ));
        }

        if config.autosave.save_interval_secs == 0 {
            return Err(ConfigError::InvalidSaveInterval(config.autosave.save_interval_secs));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        Ok(())
    }
}
