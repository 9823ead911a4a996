//! Swarm service: lifecycle of task groupings.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Swarm, SwarmStatus};
use crate::domain::ports::{SwarmRepository, TaskRepository, TaskStatusCounts};

/// A swarm with its task counts.
#[derive(Debug, Clone, Serialize)]
pub struct SwarmStats {
    pub swarm: Swarm,
    pub counts: TaskStatusCounts,
}

pub struct SwarmService<S: SwarmRepository, T: TaskRepository> {
    swarm_repo: Arc<S>,
    task_repo: Arc<T>,
}

impl<S: SwarmRepository, T: TaskRepository> SwarmService<S, T> {
    pub fn new(swarm_repo: Arc<S>, task_repo: Arc<T>) -> Self {
        Self { swarm_repo, task_repo }
    }

    pub async fn create(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        project_ref: Option<String>,
    ) -> DomainResult<Swarm> {
        let mut swarm = Swarm::new(name, description);
        swarm.project_ref = project_ref;
        swarm.validate().map_err(DomainError::ValidationFailed)?;

        self.swarm_repo.create(&swarm).await?;
        tracing::info!(swarm_id = %swarm.id, name = %swarm.name, "Swarm created");
        Ok(swarm)
    }

    pub async fn get(&self, id: Uuid) -> DomainResult<Swarm> {
        self.swarm_repo.get(id).await?.ok_or(DomainError::SwarmNotFound(id))
    }

    pub async fn list(&self, status: Option<SwarmStatus>) -> DomainResult<Vec<Swarm>> {
        self.swarm_repo.list(status).await
    }

    /// Stop dispatching new tasks. Running tasks are left alone.
    pub async fn pause(&self, id: Uuid) -> DomainResult<Swarm> {
        self.set_status(id, SwarmStatus::Paused).await
    }

    pub async fn resume(&self, id: Uuid) -> DomainResult<Swarm> {
        self.set_status(id, SwarmStatus::Active).await
    }

    /// Freeze the swarm for good.
    pub async fn stop(&self, id: Uuid) -> DomainResult<Swarm> {
        self.set_status(id, SwarmStatus::Stopped).await
    }

    /// Delete a swarm and its tasks. Refused while any task is running.
    pub async fn delete(&self, id: Uuid) -> DomainResult<()> {
        let swarm = self.get(id).await?;
        let counts = self.task_repo.count_by_status(id).await?;
        if counts.running > 0 {
            return Err(DomainError::ValidationFailed(format!(
                "Swarm '{}' has {} running task(s); cancel them or wait before deleting",
                swarm.name, counts.running
            )));
        }

        self.swarm_repo.delete(id).await?;
        tracing::info!(swarm_id = %id, tasks = counts.total(), "Swarm deleted");
        Ok(())
    }

    pub async fn stats(&self, id: Uuid) -> DomainResult<SwarmStats> {
        let swarm = self.get(id).await?;
        let counts = self.task_repo.count_by_status(id).await?;
        Ok(SwarmStats { swarm, counts })
    }

    async fn set_status(&self, id: Uuid, status: SwarmStatus) -> DomainResult<Swarm> {
        let mut swarm = self.get(id).await?;
        if swarm.status == status {
            return Ok(swarm);
        }

        let from = swarm.status;
        swarm
            .transition_to(status)
            .map_err(|reason| DomainError::InvalidStateTransition {
                from: from.as_str().to_string(),
                to: status.as_str().to_string(),
                reason,
            })?;
        self.swarm_repo.update(&swarm).await?;

        tracing::info!(swarm_id = %id, from = from.as_str(), to = status.as_str(), "Swarm status changed");
        Ok(swarm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteSandboxRepository, SqliteSwarmRepository, SqliteTaskRepository,
    };
    use crate::domain::models::{Sandbox, Task};
    use crate::domain::ports::SandboxRepository;

    async fn setup() -> (SwarmService<SqliteSwarmRepository, SqliteTaskRepository>, sqlx::SqlitePool) {
        let pool = create_migrated_test_pool().await.unwrap();
        let service = SwarmService::new(
            Arc::new(SqliteSwarmRepository::new(pool.clone())),
            Arc::new(SqliteTaskRepository::new(pool.clone())),
        );
        (service, pool)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (service, _) = setup().await;
        let swarm = service.create("frontend", "UI work", Some("repo:web".into())).await.unwrap();

        let fetched = service.get(swarm.id).await.unwrap();
        assert_eq!(fetched.name, "frontend");
        assert_eq!(fetched.project_ref.as_deref(), Some("repo:web"));
        assert_eq!(fetched.status, SwarmStatus::Active);
    }

    #[tokio::test]
    async fn test_create_rejects_blank_name() {
        let (service, _) = setup().await;
        let err = service.create("  ", "", None).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_pause_resume_stop() {
        let (service, _) = setup().await;
        let swarm = service.create("ops", "", None).await.unwrap();

        assert_eq!(service.pause(swarm.id).await.unwrap().status, SwarmStatus::Paused);
        assert_eq!(service.resume(swarm.id).await.unwrap().status, SwarmStatus::Active);
        assert_eq!(service.stop(swarm.id).await.unwrap().status, SwarmStatus::Stopped);

        let err = service.resume(swarm.id).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        assert_eq!(service.list(Some(SwarmStatus::Stopped)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_swarm() {
        let (service, _) = setup().await;
        let id = Uuid::new_v4();
        assert!(matches!(service.pause(id).await, Err(DomainError::SwarmNotFound(x)) if x == id));
    }

    #[tokio::test]
    async fn test_delete_refused_while_running() {
        let (service, pool) = setup().await;
        let tasks = SqliteTaskRepository::new(pool.clone());
        let sandboxes = SqliteSandboxRepository::new(pool);
        let swarm = service.create("busy", "", None).await.unwrap();

        let task = Task::new(swarm.id, "long job", "");
        tasks.create(&task).await.unwrap();
        let sandbox = Sandbox::provisioned("ref-1", swarm.id, "base");
        sandboxes.create(&sandbox).await.unwrap();
        assert!(tasks.start_on_sandbox(task.id, sandbox.id).await.unwrap());

        let err = service.delete(swarm.id).await.unwrap_err();
        assert!(err.is_validation());

        let stats = service.stats(swarm.id).await.unwrap();
        assert_eq!(stats.counts.running, 1);
    }

    #[tokio::test]
    async fn test_delete_cascades_tasks() {
        let (service, pool) = setup().await;
        let tasks = SqliteTaskRepository::new(pool);
        let swarm = service.create("temp", "", None).await.unwrap();
        let task = Task::new(swarm.id, "one", "");
        tasks.create(&task).await.unwrap();

        service.delete(swarm.id).await.unwrap();
        assert!(tasks.get(task.id).await.unwrap().is_none());
        assert!(matches!(service.get(swarm.id).await, Err(DomainError::SwarmNotFound(_))));
    }
}
