pub mod execution;
pub mod orchestration;
pub mod sandbox;
pub mod swarm;
pub mod task;

pub use execution::{ExecutionOutcome, LogEvent, LogStream, RetryDecision, TaskLogEntry};
pub use orchestration::OrchestrationConfig;
pub use sandbox::{Sandbox, SandboxStatus};
pub use swarm::{Swarm, SwarmStatus};
pub use task::{Task, TaskPriority, TaskStatus};
