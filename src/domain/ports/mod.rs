//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces that adapters implement:
//! - Repositories for swarms, tasks, sandboxes and the orchestration config
//! - `SandboxProvider` for execution environments

pub mod config_repository;
pub mod sandbox_provider;
pub mod sandbox_repository;
pub mod swarm_repository;
pub mod task_repository;

pub use config_repository::ConfigRepository;
pub use sandbox_provider::{SandboxCommand, SandboxProvider};
pub use sandbox_repository::SandboxRepository;
pub use swarm_repository::SwarmRepository;
pub use task_repository::{TaskFilter, TaskRepository, TaskStatusCounts, TaskTransition};
