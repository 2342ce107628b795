//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod messaging;
mod storage;

pub use messaging::AmqpConfig;
pub use storage::{MongodbConfig, StorageConfig};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "WORKFORCE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "WORKFORCE";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "WORKFORCE_LOG";
/// Environment variable selecting the log output format (`json` or text).
pub const LOG_FORMAT_ENV_VAR: &str = "WORKFORCE_LOG_FORMAT";

use serde::Deserialize;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Health endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Port for the gRPC health service.
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { port: 8081 }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker connection, topology and retry settings.
    pub amqp: AmqpConfig,
    /// Audit store configuration.
    pub storage: StorageConfig,
    /// Health endpoint configuration.
    pub health: HealthConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Reject settings the worker cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.amqp.validate()?;
        self.storage.validate()
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}
