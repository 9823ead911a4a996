//! SQLite implementation of the SandboxRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_optional_uuid, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Sandbox, SandboxStatus};
use crate::domain::ports::SandboxRepository;

#[derive(Clone)]
pub struct SqliteSandboxRepository {
    pool: SqlitePool,
}

impl SqliteSandboxRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SandboxRepository for SqliteSandboxRepository {
    async fn create(&self, sandbox: &Sandbox) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO sandboxes (id, provider_ref, swarm_id, snapshot, status, current_task_id,
               created_at, last_used_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(sandbox.id.to_string())
        .bind(&sandbox.provider_ref)
        .bind(sandbox.swarm_id.map(|id| id.to_string()))
        .bind(&sandbox.snapshot)
        .bind(sandbox.status.as_str())
        .bind(sandbox.current_task_id.map(|id| id.to_string()))
        .bind(format_datetime(sandbox.created_at))
        .bind(format_datetime(sandbox.last_used_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Sandbox>> {
        let row: Option<SandboxRow> = sqlx::query_as("SELECT * FROM sandboxes WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self, include_destroyed: bool) -> DomainResult<Vec<Sandbox>> {
        let query = if include_destroyed {
            "SELECT * FROM sandboxes ORDER BY created_at, id"
        } else {
            "SELECT * FROM sandboxes WHERE status != 'destroyed' ORDER BY created_at, id"
        };
        let rows: Vec<SandboxRow> = sqlx::query_as(query).fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn release(&self, id: Uuid) -> DomainResult<bool> {
        let result = sqlx::query(
            r#"UPDATE sandboxes SET status = 'idle', current_task_id = NULL, last_used_at = ?
               WHERE id = ? AND status = 'busy'"#,
        )
        .bind(format_datetime(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_destroyed(&self, id: Uuid) -> DomainResult<bool> {
        let result = sqlx::query(
            r#"UPDATE sandboxes SET status = 'destroyed', current_task_id = NULL
               WHERE id = ? AND status != 'destroyed'"#,
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(sqlx::FromRow)]
struct SandboxRow {
    id: String,
    provider_ref: String,
    swarm_id: Option<String>,
    snapshot: String,
    status: String,
    current_task_id: Option<String>,
    created_at: String,
    last_used_at: String,
}

impl TryFrom<SandboxRow> for Sandbox {
    type Error = DomainError;

    fn try_from(row: SandboxRow) -> Result<Self, Self::Error> {
        let status = SandboxStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid sandbox status: {}", row.status))
        })?;

        Ok(Sandbox {
            id: parse_uuid(&row.id)?,
            provider_ref: row.provider_ref,
            swarm_id: parse_optional_uuid(row.swarm_id)?,
            snapshot: row.snapshot,
            status,
            current_task_id: parse_optional_uuid(row.current_task_id)?,
            created_at: parse_datetime(&row.created_at)?,
            last_used_at: parse_datetime(&row.last_used_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    async fn setup_test_repo() -> SqliteSandboxRepository {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteSandboxRepository::new(pool)
    }

    #[tokio::test]
    async fn test_release_requires_busy() {
        let repo = setup_test_repo().await;
        let sandbox = Sandbox::provisioned("sb-1", Uuid::new_v4(), "base");
        repo.create(&sandbox).await.unwrap();

        assert!(!repo.release(sandbox.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_busy_sandbox() {
        let repo = setup_test_repo().await;
        let mut sandbox = Sandbox::provisioned("sb-1", Uuid::new_v4(), "base");
        sandbox.status = SandboxStatus::Busy;
        sandbox.current_task_id = Some(Uuid::new_v4());
        sandbox.last_used_at = Utc::now() - chrono::Duration::hours(1);
        repo.create(&sandbox).await.unwrap();

        assert!(repo.release(sandbox.id).await.unwrap());
        let released = repo.get(sandbox.id).await.unwrap().unwrap();
        assert_eq!(released.status, SandboxStatus::Idle);
        assert!(released.current_task_id.is_none());
        assert!(released.last_used_at > sandbox.last_used_at);
    }

    #[tokio::test]
    async fn test_mark_destroyed_is_idempotent() {
        let repo = setup_test_repo().await;
        let sandbox = Sandbox::provisioned("sb-1", Uuid::new_v4(), "base");
        repo.create(&sandbox).await.unwrap();

        assert!(repo.mark_destroyed(sandbox.id).await.unwrap());
        assert!(!repo.mark_destroyed(sandbox.id).await.unwrap());
        assert!(repo.list(false).await.unwrap().is_empty());
        assert_eq!(repo.list(true).await.unwrap().len(), 1);
    }
}
