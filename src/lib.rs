//! Swarm Dispatch - task orchestration over pooled agent sandboxes
//!
//! Users submit tasks with dependency edges into swarms. A periodic trigger
//! engine picks runnable tasks, leases sandboxes from a bounded pool, runs an
//! AI agent command in each, and settles the outcome through a retry policy.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Models, invariants, errors and ports
//! - **Service Layer** (`services`): Scheduling, pooling, execution, retries
//! - **Application Layer** (`application`): The trigger engine loop
//! - **Adapters** (`adapters`): SQLite repositories and sandbox providers
//! - **Infrastructure Layer** (`infrastructure`): Configuration and logging
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use swarm_dispatch::cli::context::AppContext;
//! use swarm_dispatch::infrastructure::config::ConfigLoader;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let ctx = AppContext::open(&config).await?;
//!     let report = ctx.trigger_engine().run_once().await?;
//!     println!("dispatched {}", report.dispatched.len());
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{CycleReport, EngineState, EngineStats, TriggerEngine};
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    ExecutionOutcome, OrchestrationConfig, RetryDecision, Sandbox, SandboxStatus, Swarm,
    SwarmStatus, Task, TaskPriority, TaskStatus,
};
pub use domain::ports::{
    ConfigRepository, SandboxProvider, SandboxRepository, SwarmRepository, TaskFilter,
    TaskRepository,
};
pub use infrastructure::config::{AppConfig, ConfigError, ConfigLoader};
pub use services::{
    DependencyResolver, ExecutionRegistry, PoolManager, Scheduler, SwarmService, TaskExecutor,
    TaskService,
};
