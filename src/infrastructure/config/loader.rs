use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use super::{AppConfig, PROJECT_DIR};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Executor agent_command cannot be empty")]
    EmptyAgentCommand,

    #[error("Invalid orchestration settings: {0}")]
    InvalidOrchestration(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. .swarm-dispatch/config.yaml (project config, created by init)
    /// 3. .swarm-dispatch/local.yaml (local overrides, optional)
    /// 4. Environment variables (SWARM_DISPATCH_* prefix, `__` for nesting)
    pub fn load() -> Result<AppConfig, ConfigError> {
        Self::load_from_dir(PROJECT_DIR)
    }

    /// Same as [`ConfigLoader::load`] with the project directory at `dir`.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
        let dir = dir.as_ref();
        let config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed("SWARM_DISPATCH_").split("__"))
            .extract()
            .map_err(Box::new)?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &AppConfig) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        if config.executor.agent_command.iter().all(|part| part.trim().is_empty()) {
            return Err(ConfigError::EmptyAgentCommand);
        }

        config
            .orchestration
            .validate()
            .map_err(|e| ConfigError::InvalidOrchestration(e.to_string()))
    }

    /// Render a config as the YAML written by `init`.
    pub fn to_yaml(config: &AppConfig) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(config)
    }
}
