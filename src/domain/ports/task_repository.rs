//! Task repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{LogStream, Task, TaskLogEntry, TaskStatus};

/// Filter criteria for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub swarm_id: Option<Uuid>,
    pub status: Option<TaskStatus>,
}

/// Task counts per status, used for swarm statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStatusCounts {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl TaskStatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.running + self.completed + self.failed + self.cancelled
    }
}

/// A guarded status change applied by [`TaskRepository::transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskTransition {
    /// running -> completed, stores the result
    Complete { result: String },
    /// running|pending -> pending, records the charged attempt and when it
    /// may run again
    Requeue {
        retry_count: u32,
        error: String,
        retry_after: Option<DateTime<Utc>>,
    },
    /// running|pending -> failed, records the final error
    Fail { retry_count: u32, error: String },
    /// pending|running -> cancelled
    Cancel,
    /// failed -> pending, resetting attempts and outputs
    Retry,
    /// running -> pending without charging an attempt
    Recover,
}

impl TaskTransition {
    /// Statuses the transition is allowed to start from.
    pub fn allowed_from(&self) -> &'static [TaskStatus] {
        match self {
            Self::Complete { .. } | Self::Recover => &[TaskStatus::Running],
            Self::Requeue { .. } | Self::Fail { .. } | Self::Cancel => {
                &[TaskStatus::Running, TaskStatus::Pending]
            }
            Self::Retry => &[TaskStatus::Failed],
        }
    }

    pub fn target(&self) -> TaskStatus {
        match self {
            Self::Complete { .. } => TaskStatus::Completed,
            Self::Requeue { .. } | Self::Retry | Self::Recover => TaskStatus::Pending,
            Self::Fail { .. } => TaskStatus::Failed,
            Self::Cancel => TaskStatus::Cancelled,
        }
    }
}

/// Repository port for task persistence.
///
/// Status changes are conditional on the current status; methods that apply
/// one return `false` when the guard did not match.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a new task with its dependency edges.
    async fn create(&self, task: &Task) -> DomainResult<()>;

    /// Get a task by ID.
    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>>;

    /// Get every task whose ID is in `ids`; unknown IDs are skipped.
    async fn get_many(&self, ids: &[Uuid]) -> DomainResult<Vec<Task>>;

    /// List tasks ordered by priority (urgent first) then arrival.
    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>>;

    /// Persist edits to a pending task's editable fields.
    ///
    /// Edges are re-checked against the committed graph in the same write, so
    /// an edit that would close a loop fails with `DependencyCycle`.
    async fn update_pending(&self, task: &Task) -> DomainResult<bool>;

    /// Delete a task that is not running.
    async fn delete(&self, id: Uuid) -> DomainResult<bool>;

    /// Count tasks per status within a swarm.
    async fn count_by_status(&self, swarm_id: Uuid) -> DomainResult<TaskStatusCounts>;

    /// Atomically move the task pending -> running and the sandbox idle -> busy.
    ///
    /// Either both rows change or neither does.
    async fn start_on_sandbox(&self, task_id: Uuid, sandbox_id: Uuid) -> DomainResult<bool>;

    /// Apply a guarded status change.
    async fn transition(&self, task_id: Uuid, transition: TaskTransition) -> DomainResult<bool>;

    /// Append a line to the task's execution log.
    async fn append_log(&self, task_id: Uuid, stream: LogStream, line: &str) -> DomainResult<()>;

    /// Read log lines with `seq` greater than `after`, oldest first.
    async fn logs(
        &self,
        task_id: Uuid,
        after: Option<i64>,
        limit: usize,
    ) -> DomainResult<Vec<TaskLogEntry>>;
}
