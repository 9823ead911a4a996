//! Short ID prefix resolution for CLI arguments.
//!
//! Allows users to specify any unique prefix of a UUID instead of the full ID,
//! similar to git short hashes.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use std::fmt::Write as _;
use uuid::Uuid;

const TASK_QUERY: &str = "SELECT id FROM tasks WHERE id LIKE ?";
const SWARM_QUERY: &str = "SELECT id FROM swarms WHERE id LIKE ? UNION SELECT id FROM swarms WHERE name = ?";
const SANDBOX_QUERY: &str =
    "SELECT id FROM sandboxes WHERE id LIKE ? UNION SELECT id FROM sandboxes WHERE provider_ref = ?";

/// Resolve a task ID prefix to a full UUID.
pub async fn resolve_task_id(pool: &SqlitePool, prefix: &str) -> Result<Uuid> {
    resolve_prefix(pool, prefix, "task", TASK_QUERY, false).await
}

/// Resolve a swarm ID prefix, or an exact swarm name, to a full UUID.
pub async fn resolve_swarm_id(pool: &SqlitePool, prefix: &str) -> Result<Uuid> {
    resolve_prefix(pool, prefix, "swarm", SWARM_QUERY, true).await
}

/// Resolve a sandbox ID prefix, or its provider reference, to a full UUID.
pub async fn resolve_sandbox_id(pool: &SqlitePool, prefix: &str) -> Result<Uuid> {
    resolve_prefix(pool, prefix, "sandbox", SANDBOX_QUERY, true).await
}

fn is_prefix(prefix: &str) -> bool {
    !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

async fn resolve_prefix(
    pool: &SqlitePool,
    prefix: &str,
    entity: &str,
    query: &str,
    by_name: bool,
) -> Result<Uuid> {
    // Fast path: a full UUID is taken as is
    if let Ok(uuid) = Uuid::parse_str(prefix) {
        return Ok(uuid);
    }

    if prefix.is_empty() {
        bail!("ID prefix must not be empty");
    }
    if !by_name && !is_prefix(prefix) {
        bail!("Invalid ID prefix '{prefix}': must contain only hex characters and dashes");
    }

    // A name never matches as a LIKE pattern
    let pattern = if is_prefix(prefix) {
        format!("{}%", prefix.to_lowercase())
    } else {
        String::new()
    };

    let mut q = sqlx::query_as::<_, (String,)>(query).bind(&pattern);
    if by_name {
        q = q.bind(prefix);
    }
    let rows = q.fetch_all(pool).await?;

    match rows.as_slice() {
        [] => bail!("No {entity} found matching '{prefix}'"),
        [(id,)] => Ok(Uuid::parse_str(id)?),
        rows => {
            let mut msg = format!("Ambiguous prefix '{prefix}': matches {} {entity}s:", rows.len());
            for (id,) in rows {
                let _ = write!(msg, "\n  {id}");
            }
            bail!("{msg}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteSwarmRepository, SqliteTaskRepository};
    use crate::domain::models::{Swarm, Task};
    use crate::domain::ports::{SwarmRepository, TaskRepository};

    #[tokio::test]
    async fn test_resolve_by_prefix_and_name() {
        let pool = create_migrated_test_pool().await.unwrap();
        let swarms = SqliteSwarmRepository::new(pool.clone());
        let tasks = SqliteTaskRepository::new(pool.clone());
        let swarm = Swarm::new("backend", "");
        swarms.create(&swarm).await.unwrap();
        let task = Task::new(swarm.id, "t", "");
        tasks.create(&task).await.unwrap();

        let prefix = &task.id.to_string()[..8];
        assert_eq!(resolve_task_id(&pool, prefix).await.unwrap(), task.id);
        assert_eq!(resolve_swarm_id(&pool, "backend").await.unwrap(), swarm.id);
        assert_eq!(resolve_swarm_id(&pool, &swarm.id.to_string()).await.unwrap(), swarm.id);
    }

    #[tokio::test]
    async fn test_resolve_errors() {
        let pool = create_migrated_test_pool().await.unwrap();
        assert!(resolve_task_id(&pool, "").await.is_err());
        assert!(resolve_task_id(&pool, "zz-not-hex").await.is_err());
        let err = resolve_task_id(&pool, "abc").await.unwrap_err();
        assert!(err.to_string().contains("No task found"));
    }
}
