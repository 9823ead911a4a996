//! SQLite implementation of the SwarmRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Swarm, SwarmStatus};
use crate::domain::ports::SwarmRepository;

#[derive(Clone)]
pub struct SqliteSwarmRepository {
    pool: SqlitePool,
}

impl SqliteSwarmRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SwarmRepository for SqliteSwarmRepository {
    async fn create(&self, swarm: &Swarm) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO swarms (id, name, description, status, project_ref, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(swarm.id.to_string())
        .bind(&swarm.name)
        .bind(&swarm.description)
        .bind(swarm.status.as_str())
        .bind(&swarm.project_ref)
        .bind(format_datetime(swarm.created_at))
        .bind(format_datetime(swarm.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Swarm>> {
        let row: Option<SwarmRow> = sqlx::query_as("SELECT * FROM swarms WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self, status: Option<SwarmStatus>) -> DomainResult<Vec<Swarm>> {
        let rows: Vec<SwarmRow> = match status {
            Some(status) => {
                sqlx::query_as("SELECT * FROM swarms WHERE status = ? ORDER BY created_at, id")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM swarms ORDER BY created_at, id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update(&self, swarm: &Swarm) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE swarms SET name = ?, description = ?, status = ?, project_ref = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&swarm.name)
        .bind(&swarm.description)
        .bind(swarm.status.as_str())
        .bind(&swarm.project_ref)
        .bind(format_datetime(swarm.updated_at))
        .bind(swarm.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::SwarmNotFound(swarm.id));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> DomainResult<()> {
        let result = sqlx::query("DELETE FROM swarms WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::SwarmNotFound(id));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct SwarmRow {
    id: String,
    name: String,
    description: Option<String>,
    status: String,
    project_ref: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SwarmRow> for Swarm {
    type Error = DomainError;

    fn try_from(row: SwarmRow) -> Result<Self, Self::Error> {
        let status = SwarmStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid swarm status: {}", row.status))
        })?;

        Ok(Swarm {
            id: parse_uuid(&row.id)?,
            name: row.name,
            description: row.description.unwrap_or_default(),
            status,
            project_ref: row.project_ref,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}
