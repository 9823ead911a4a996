//! Configuration management infrastructure
//!
//! Hierarchical configuration using figment:
//! - YAML file loading
//! - Environment variable overrides
//! - Configuration validation
//! - Type-safe config structs

pub mod loader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::models::OrchestrationConfig;
use crate::infrastructure::logging::LogConfig;

pub use loader::{ConfigError, ConfigLoader};

/// Directory holding the project's config, database and sandboxes.
pub const PROJECT_DIR: &str = ".swarm-dispatch";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LogConfig,
    pub provider: ProviderConfig,
    pub executor: ExecutorConfig,
    /// Seed for the stored orchestration record, written by `init`
    pub orchestration: OrchestrationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: format!("{PROJECT_DIR}/dispatch.db"),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Working directories on this machine
    #[default]
    Local,
    /// Scripted in-memory provider
    Mock,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Mock => "mock",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Root directory for local sandboxes
    pub work_root: PathBuf,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            work_root: PathBuf::from(PROJECT_DIR).join("sandboxes"),
        }
    }
}

/// How the executor builds the agent command and prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Program and leading arguments; the prompt is appended as the last argument
    pub agent_command: Vec<String>,
    /// Directory holding `<skill>/SKILL.md` files inside the sandbox
    pub skills_path: String,
    /// Directory holding CLI documentation inside the sandbox
    pub cli_docs_path: String,
    /// Working directory announced to the agent
    pub workspace_dir: String,
    /// Environment variables copied from this process into each execution
    pub passthrough_env: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            agent_command: vec!["claude".to_string(), "--yes".to_string(), "--print".to_string()],
            skills_path: "/data/.claude/skills".to_string(),
            cli_docs_path: "/data/.claude/cli".to_string(),
            workspace_dir: ".".to_string(),
            passthrough_env: vec![
                "ANTHROPIC_API_KEY".to_string(),
                "CLAUDE_CODE_API_KEY".to_string(),
            ],
        }
    }
}
