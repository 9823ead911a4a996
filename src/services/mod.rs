//! Service layer: scheduling, pooling, execution and the task/swarm APIs.

pub mod dependency_resolver;
pub mod directives;
pub mod execution_registry;
pub mod pool_manager;
pub mod prompt_builder;
pub mod retry_policy;
pub mod scheduler;
pub mod swarm_service;
pub mod task_executor;
pub mod task_service;

pub use dependency_resolver::DependencyResolver;
pub use directives::TaskDirectives;
pub use execution_registry::ExecutionRegistry;
pub use pool_manager::{Acquisition, PoolManager, PoolStatus, SandboxSummary};
pub use prompt_builder::{build_agent_command, build_worker_prompt};
pub use retry_policy::RetryPolicy;
pub use scheduler::{select_next, select_next_at, BlockedTask, Scheduler, Selection};
pub use swarm_service::{SwarmService, SwarmStats};
pub use task_executor::TaskExecutor;
pub use task_service::{NewTask, TaskService, TaskUpdate};
