//! Common test utilities for integration tests
//!
//! Builds an in-memory store, a mock provider and a trigger engine wired the
//! way the CLI wires them, with short poll intervals.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use swarm_dispatch::adapters::providers::MockProvider;
use swarm_dispatch::adapters::sqlite::{
    create_migrated_test_pool, SqliteConfigRepository, SqliteSandboxRepository,
    SqliteSwarmRepository, SqliteTaskRepository,
};
use swarm_dispatch::domain::models::{OrchestrationConfig, Swarm, Task, TaskPriority};
use swarm_dispatch::domain::ports::{ConfigRepository, SwarmRepository, TaskRepository};
use swarm_dispatch::infrastructure::config::ExecutorConfig;
use swarm_dispatch::services::{ExecutionRegistry, TaskExecutor, TaskService};
use swarm_dispatch::TriggerEngine;

pub type Engine = TriggerEngine<
    SqliteTaskRepository,
    SqliteSwarmRepository,
    SqliteSandboxRepository,
    SqliteConfigRepository,
>;

pub struct Harness {
    pub engine: Arc<Engine>,
    pub tasks: Arc<SqliteTaskRepository>,
    pub swarms: Arc<SqliteSwarmRepository>,
    pub sandboxes: Arc<SqliteSandboxRepository>,
    pub config: Arc<SqliteConfigRepository>,
    pub provider: Arc<MockProvider>,
    pub registry: ExecutionRegistry,
}

/// Orchestration config suited to tests: small pool, fast polling, and
/// requeued tasks eligible again immediately.
pub fn test_config(pool_max_sandboxes: u32, max_retries: u32) -> OrchestrationConfig {
    OrchestrationConfig {
        pool_max_sandboxes,
        max_retries,
        trigger_poll_interval_secs: 1,
        execution_timeout_secs: 10,
        retry_base_delay_secs: 0,
        ..Default::default()
    }
}

pub fn executor_settings() -> ExecutorConfig {
    ExecutorConfig {
        agent_command: vec!["agent".to_string(), "--print".to_string()],
        passthrough_env: vec![],
        ..Default::default()
    }
}

pub async fn harness(provider: MockProvider, config: OrchestrationConfig) -> Harness {
    let db = create_migrated_test_pool().await.expect("Failed to create test database");
    let tasks = Arc::new(SqliteTaskRepository::new(db.clone()));
    let swarms = Arc::new(SqliteSwarmRepository::new(db.clone()));
    let sandboxes = Arc::new(SqliteSandboxRepository::new(db.clone()));
    let config_repo = Arc::new(SqliteConfigRepository::new(db));
    config_repo.save(&config).await.expect("Failed to save config");

    let provider = Arc::new(provider);
    let registry = ExecutionRegistry::new();
    let engine = TriggerEngine::new(
        tasks.clone(),
        swarms.clone(),
        sandboxes.clone(),
        config_repo.clone(),
        provider.clone(),
        executor_settings(),
        registry.clone(),
    )
    .with_shutdown_grace(Duration::from_secs(5));
    let executor = TaskExecutor::new(tasks.clone(), engine.pool().clone(), executor_settings())
        .with_status_poll_interval(Duration::from_millis(20));

    Harness {
        engine: Arc::new(engine.with_executor(executor)),
        tasks,
        swarms,
        sandboxes,
        config: config_repo,
        provider,
        registry,
    }
}

impl Harness {
    pub async fn swarm(&self, name: &str) -> Swarm {
        let swarm = Swarm::new(name, "");
        self.swarms.create(&swarm).await.expect("Failed to create swarm");
        swarm
    }

    pub async fn task(&self, swarm: &Swarm, title: &str, priority: TaskPriority) -> Task {
        let task = Task::new(swarm.id, title, "").with_priority(priority);
        self.tasks.create(&task).await.expect("Failed to create task");
        task
    }

    pub async fn reload(&self, task: &Task) -> Task {
        self.tasks
            .get(task.id)
            .await
            .expect("Failed to load task")
            .expect("Task disappeared")
    }

    /// Task service sharing the engine's execution registry.
    pub fn task_service(&self) -> TaskService<SqliteTaskRepository, SqliteSwarmRepository> {
        TaskService::new(self.tasks.clone(), self.swarms.clone(), self.registry.clone())
    }
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
