//! Shared wiring for CLI commands: database, repositories and services.

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;

use crate::adapters::providers;
use crate::adapters::sqlite::{
    database_url, initialize_database, PoolConfig, SqliteConfigRepository, SqliteSandboxRepository,
    SqliteSwarmRepository, SqliteTaskRepository,
};
use crate::application::TriggerEngine;
use crate::domain::models::OrchestrationConfig;
use crate::domain::ports::ConfigRepository;
use crate::infrastructure::config::AppConfig;
use crate::services::{ExecutionRegistry, PoolManager, SwarmService, TaskService};

pub type CliSwarmService = SwarmService<SqliteSwarmRepository, SqliteTaskRepository>;
pub type CliTaskService = TaskService<SqliteTaskRepository, SqliteSwarmRepository>;
pub type CliTriggerEngine = TriggerEngine<
    SqliteTaskRepository,
    SqliteSwarmRepository,
    SqliteSandboxRepository,
    SqliteConfigRepository,
>;

/// Open database plus the repositories every command builds on.
pub struct AppContext {
    pub config: AppConfig,
    pub pool: SqlitePool,
    pub task_repo: Arc<SqliteTaskRepository>,
    pub swarm_repo: Arc<SqliteSwarmRepository>,
    pub sandbox_repo: Arc<SqliteSandboxRepository>,
    pub config_repo: Arc<SqliteConfigRepository>,
}

impl AppContext {
    /// Open the project database. Fails if `init` has not been run.
    pub async fn open(config: &AppConfig) -> Result<Self> {
        let path = &config.database.path;
        if !path.starts_with("sqlite:") && !Path::new(path).exists() {
            bail!("Database not found at {path}. Run 'swarm-dispatch init' first.");
        }
        Self::connect(config).await
    }

    /// Open the database, creating and migrating it when missing.
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let pool = initialize_database(
            &database_url(&config.database.path),
            Some(PoolConfig::from(&config.database)),
        )
        .await
        .context("Failed to initialize database")?;

        Ok(Self {
            config: config.clone(),
            task_repo: Arc::new(SqliteTaskRepository::new(pool.clone())),
            swarm_repo: Arc::new(SqliteSwarmRepository::new(pool.clone())),
            sandbox_repo: Arc::new(SqliteSandboxRepository::new(pool.clone())),
            config_repo: Arc::new(SqliteConfigRepository::new(pool.clone())),
            pool,
        })
    }

    /// Stored orchestration config, seeded from the file config on first use.
    pub async fn orchestration(&self) -> Result<OrchestrationConfig> {
        self.config_repo
            .seed(&self.config.orchestration)
            .await
            .context("Failed to load orchestration config")
    }

    pub fn swarm_service(&self) -> CliSwarmService {
        SwarmService::new(self.swarm_repo.clone(), self.task_repo.clone())
    }

    /// Task service with a registry local to this process. Cancels of tasks
    /// running in another process reach them through the stored status.
    pub fn task_service(&self) -> CliTaskService {
        TaskService::new(
            self.task_repo.clone(),
            self.swarm_repo.clone(),
            ExecutionRegistry::new(),
        )
    }

    pub fn pool_manager(&self) -> PoolManager<SqliteSandboxRepository> {
        PoolManager::new(
            self.sandbox_repo.clone(),
            providers::from_config(&self.config.provider),
        )
    }

    pub fn trigger_engine(&self) -> CliTriggerEngine {
        TriggerEngine::new(
            self.task_repo.clone(),
            self.swarm_repo.clone(),
            self.sandbox_repo.clone(),
            self.config_repo.clone(),
            providers::from_config(&self.config.provider),
            self.config.executor.clone(),
            ExecutionRegistry::new(),
        )
    }
}
