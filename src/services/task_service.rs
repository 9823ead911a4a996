//! Task service implementing business logic.

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{SwarmStatus, Task, TaskLogEntry, TaskPriority, TaskStatus};
use crate::domain::ports::{SwarmRepository, TaskFilter, TaskRepository, TaskTransition};
use crate::services::dependency_resolver::DependencyResolver;
use crate::services::execution_registry::ExecutionRegistry;

/// Input for [`TaskService::create`].
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub swarm_id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub depends_on: Vec<Uuid>,
    pub triggers_after: Vec<Uuid>,
    pub tags: Vec<String>,
}

impl NewTask {
    pub fn new(swarm_id: Uuid, title: impl Into<String>) -> Self {
        Self {
            swarm_id,
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Edits to a pending task. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub tags: Option<Vec<String>>,
    pub depends_on: Option<Vec<Uuid>>,
    pub triggers_after: Option<Vec<Uuid>>,
}

impl TaskUpdate {
    fn touches_edges(&self) -> bool {
        self.depends_on.is_some() || self.triggers_after.is_some()
    }
}

pub struct TaskService<T: TaskRepository, S: SwarmRepository> {
    task_repo: Arc<T>,
    swarm_repo: Arc<S>,
    registry: ExecutionRegistry,
    resolver: DependencyResolver,
}

impl<T: TaskRepository, S: SwarmRepository> TaskService<T, S> {
    pub fn new(task_repo: Arc<T>, swarm_repo: Arc<S>, registry: ExecutionRegistry) -> Self {
        Self {
            task_repo,
            swarm_repo,
            registry,
            resolver: DependencyResolver::new(),
        }
    }

    /// Create a pending task after validating fields and dependency edges.
    pub async fn create(&self, input: NewTask) -> DomainResult<Task> {
        let swarm = self
            .swarm_repo
            .get(input.swarm_id)
            .await?
            .ok_or(DomainError::SwarmNotFound(input.swarm_id))?;
        if swarm.status == SwarmStatus::Stopped {
            return Err(DomainError::ValidationFailed(format!(
                "Swarm '{}' is stopped and accepts no new tasks",
                swarm.name
            )));
        }

        let mut task = Task::new(input.swarm_id, input.title, input.description)
            .with_priority(input.priority);
        for dep in input.depends_on {
            task = task.with_dependency(dep);
        }
        for after in input.triggers_after {
            task = task.with_trigger_after(after);
        }
        for tag in input.tags {
            task = task.with_tag(tag);
        }
        task.validate().map_err(DomainError::ValidationFailed)?;

        if !task.depends_on.is_empty() || !task.triggers_after.is_empty() {
            let swarm_tasks = self.swarm_tasks(task.swarm_id).await?;
            self.resolver.check_mutation(&task, &swarm_tasks)?;
        }

        self.task_repo.create(&task).await?;
        tracing::info!(
            task_id = %task.id,
            swarm_id = %task.swarm_id,
            priority = task.priority.as_str(),
            dependencies = task.depends_on.len(),
            "Task created"
        );
        Ok(task)
    }

    /// Edit a task. Only pending tasks can be edited.
    pub async fn update(&self, id: Uuid, update: TaskUpdate) -> DomainResult<Task> {
        let mut task = self.get(id).await?;
        if task.status != TaskStatus::Pending {
            return Err(DomainError::ValidationFailed(format!(
                "Only pending tasks can be edited; task is {}",
                task.status.as_str()
            )));
        }

        let touches_edges = update.touches_edges();
        if let Some(title) = update.title {
            task.title = title;
        }
        if let Some(description) = update.description {
            task.description = description;
        }
        if let Some(priority) = update.priority {
            task.priority = priority;
        }
        if let Some(tags) = update.tags {
            task.tags = Vec::new();
            for tag in tags {
                task = task.with_tag(tag);
            }
        }
        if let Some(deps) = update.depends_on {
            task.depends_on = Vec::new();
            for dep in deps {
                task = task.with_dependency(dep);
            }
        }
        if let Some(after) = update.triggers_after {
            task.triggers_after = Vec::new();
            for id in after {
                task = task.with_trigger_after(id);
            }
        }
        task.validate().map_err(DomainError::ValidationFailed)?;

        if touches_edges {
            let swarm_tasks = self.swarm_tasks(task.swarm_id).await?;
            self.resolver.check_mutation(&task, &swarm_tasks)?;
        }

        if !self.task_repo.update_pending(&task).await? {
            return Err(DomainError::ConcurrencyConflict {
                entity: "task".to_string(),
                id: id.to_string(),
            });
        }
        tracing::info!(task_id = %id, "Task updated");
        self.get(id).await
    }

    pub async fn get(&self, id: Uuid) -> DomainResult<Task> {
        self.task_repo.get(id).await?.ok_or(DomainError::TaskNotFound(id))
    }

    pub async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>> {
        self.task_repo.list(filter).await
    }

    /// Delete a task that is not running.
    pub async fn delete(&self, id: Uuid) -> DomainResult<()> {
        let task = self.get(id).await?;
        if task.status == TaskStatus::Running {
            return Err(DomainError::ValidationFailed(
                "Cannot delete a running task; cancel it first".to_string(),
            ));
        }
        if !self.task_repo.delete(id).await? {
            return Err(DomainError::ConcurrencyConflict {
                entity: "task".to_string(),
                id: id.to_string(),
            });
        }
        tracing::info!(task_id = %id, "Task deleted");
        Ok(())
    }

    /// Put a failed task back to pending with a fresh retry budget.
    pub async fn retry(&self, id: Uuid) -> DomainResult<Task> {
        let task = self.get(id).await?;
        if !self.task_repo.transition(id, TaskTransition::Retry).await? {
            return Err(DomainError::InvalidStateTransition {
                from: task.status.as_str().to_string(),
                to: TaskStatus::Pending.as_str().to_string(),
                reason: "only failed tasks can be retried".to_string(),
            });
        }
        tracing::info!(task_id = %id, previous_attempts = task.retry_count, "Task reset for retry");
        self.get(id).await
    }

    /// Cancel a pending or running task.
    ///
    /// A running execution is signalled to abort; it releases its sandbox
    /// on the way out.
    pub async fn cancel(&self, id: Uuid) -> DomainResult<Task> {
        let task = self.get(id).await?;
        if !self.task_repo.transition(id, TaskTransition::Cancel).await? {
            return Err(DomainError::InvalidStateTransition {
                from: task.status.as_str().to_string(),
                to: TaskStatus::Cancelled.as_str().to_string(),
                reason: "task already finished".to_string(),
            });
        }

        let signalled = self.registry.cancel(id).await;
        tracing::info!(task_id = %id, was = task.status.as_str(), signalled, "Task cancelled");
        self.get(id).await
    }

    /// Log lines with sequence numbers greater than `after`.
    pub async fn logs(&self, id: Uuid, after: Option<i64>, limit: usize) -> DomainResult<Vec<TaskLogEntry>> {
        self.get(id).await?;
        self.task_repo.logs(id, after, limit).await
    }

    async fn swarm_tasks(&self, swarm_id: Uuid) -> DomainResult<Vec<Task>> {
        self.task_repo
            .list(TaskFilter {
                swarm_id: Some(swarm_id),
                ..Default::default()
            })
            .await
    }
}
