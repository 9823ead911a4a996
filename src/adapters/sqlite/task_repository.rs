//! SQLite implementation of the TaskRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_json_or_default, parse_optional_datetime, parse_optional_uuid, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{LogStream, Task, TaskLogEntry, TaskPriority, TaskStatus};
use crate::domain::ports::{TaskFilter, TaskRepository, TaskStatusCounts, TaskTransition};

const PRIORITY_ORDER: &str = "CASE priority
    WHEN 'urgent' THEN 1
    WHEN 'high' THEN 2
    WHEN 'medium' THEN 3
    WHEN 'low' THEN 4
END";

#[derive(Clone)]
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, task: &Task) -> DomainResult<()> {
        let tags_json = serde_json::to_string(&task.tags)?;
        let triggers_json = serde_json::to_string(&task.triggers_after)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"INSERT INTO tasks (id, swarm_id, title, description, status, priority, sandbox_id,
               triggers_after, result, error, tags, retry_count, retry_after, created_at,
               updated_at, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(task.id.to_string())
        .bind(task.swarm_id.to_string())
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.priority.as_str())
        .bind(task.sandbox_ref.map(|id| id.to_string()))
        .bind(&triggers_json)
        .bind(&task.result)
        .bind(&task.error)
        .bind(&tags_json)
        .bind(i64::from(task.retry_count))
        .bind(task.retry_after.map(format_datetime))
        .bind(format_datetime(task.created_at))
        .bind(format_datetime(task.updated_at))
        .bind(task.started_at.map(format_datetime))
        .bind(task.completed_at.map(format_datetime))
        .execute(&mut *tx)
        .await?;

        for dep_id in &task.depends_on {
            sqlx::query("INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_id) VALUES (?, ?)")
                .bind(task.id.to_string())
                .bind(dep_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let mut task: Task = r.try_into()?;
                self.load_dependencies(&mut task).await?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    async fn get_many(&self, ids: &[Uuid]) -> DomainResult<Vec<Task>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let query = format!("SELECT * FROM tasks WHERE id IN ({placeholders})");
        let mut q = sqlx::query_as::<_, TaskRow>(&query);
        for id in ids {
            q = q.bind(id.to_string());
        }

        let rows = q.fetch_all(&self.pool).await?;
        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let mut task: Task = row.try_into()?;
            self.load_dependencies(&mut task).await?;
            tasks.push(task);
        }
        Ok(tasks)
    }

    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>> {
        let mut clause = String::from(" WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(swarm_id) = filter.swarm_id {
            clause.push_str(" AND tasks.swarm_id = ?");
            bindings.push(swarm_id.to_string());
        }
        if let Some(status) = filter.status {
            clause.push_str(" AND tasks.status = ?");
            bindings.push(status.as_str().to_string());
        }

        let query = format!("SELECT * FROM tasks{clause} ORDER BY {PRIORITY_ORDER}, created_at, id");
        let mut q = sqlx::query_as::<_, TaskRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }
        let rows = q.fetch_all(&self.pool).await?;

        // One query for every edge of the listed tasks
        let edge_query = format!(
            "SELECT d.task_id, d.depends_on_id FROM task_dependencies d
             INNER JOIN tasks ON tasks.id = d.task_id{clause}"
        );
        let mut q = sqlx::query_as::<_, (String, String)>(&edge_query);
        for binding in &bindings {
            q = q.bind(binding);
        }
        let mut edges: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (task_id, dep_id) in q.fetch_all(&self.pool).await? {
            edges
                .entry(parse_uuid(&task_id)?)
                .or_default()
                .push(parse_uuid(&dep_id)?);
        }

        rows.into_iter()
            .map(|row| {
                let mut task: Task = row.try_into()?;
                task.depends_on = edges.remove(&task.id).unwrap_or_default();
                Ok(task)
            })
            .collect()
    }

    async fn update_pending(&self, task: &Task) -> DomainResult<bool> {
        let tags_json = serde_json::to_string(&task.tags)?;
        let triggers_json = serde_json::to_string(&task.triggers_after)?;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"UPDATE tasks SET title = ?, description = ?, priority = ?, tags = ?,
               triggers_after = ?, updated_at = ?
               WHERE id = ? AND status = 'pending'"#,
        )
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.priority.as_str())
        .bind(&tags_json)
        .bind(&triggers_json)
        .bind(format_datetime(Utc::now()))
        .bind(task.id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM task_dependencies WHERE task_id = ?")
            .bind(task.id.to_string())
            .execute(&mut *tx)
            .await?;
        for dep_id in &task.depends_on {
            sqlx::query("INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_id) VALUES (?, ?)")
                .bind(task.id.to_string())
                .bind(dep_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        // The write lock is held from the first UPDATE, so this sees every
        // committed edit; a concurrent edit checked against a stale graph
        // cannot close a loop through this task.
        if let Some(cycle) = cycle_through(&mut *tx, task.id).await? {
            tx.rollback().await?;
            return Err(DomainError::DependencyCycle(cycle));
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn delete(&self, id: Uuid) -> DomainResult<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ? AND status != 'running'")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_by_status(&self, swarm_id: Uuid) -> DomainResult<TaskStatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM tasks WHERE swarm_id = ? GROUP BY status")
                .bind(swarm_id.to_string())
                .fetch_all(&self.pool)
                .await?;

        let mut counts = TaskStatusCounts::default();
        for (status, count) in rows {
            let count = u64::try_from(count).unwrap_or_default();
            match TaskStatus::from_str(&status) {
                Some(TaskStatus::Pending) => counts.pending = count,
                Some(TaskStatus::Running) => counts.running = count,
                Some(TaskStatus::Completed) => counts.completed = count,
                Some(TaskStatus::Failed) => counts.failed = count,
                Some(TaskStatus::Cancelled) => counts.cancelled = count,
                None => {}
            }
        }
        Ok(counts)
    }

    async fn start_on_sandbox(&self, task_id: Uuid, sandbox_id: Uuid) -> DomainResult<bool> {
        let now = format_datetime(Utc::now());
        let mut tx = self.pool.begin().await?;

        // Guarded on status, live dependencies and an active swarm so a
        // concurrent edit, cancel or pause between selection and start wins.
        let started = sqlx::query(
            r#"UPDATE tasks SET status = 'running', sandbox_id = ?, retry_after = NULL,
                   started_at = COALESCE(started_at, ?), updated_at = ?
               WHERE id = ? AND status = 'pending'
                 AND EXISTS (SELECT 1 FROM swarms s WHERE s.id = tasks.swarm_id AND s.status = 'active')
                 AND NOT EXISTS (
                     SELECT 1 FROM task_dependencies d
                     LEFT JOIN tasks dep ON dep.id = d.depends_on_id
                     WHERE d.task_id = tasks.id
                       AND (dep.id IS NULL OR dep.status != 'completed')
                 )"#,
        )
        .bind(sandbox_id.to_string())
        .bind(&now)
        .bind(&now)
        .bind(task_id.to_string())
        .execute(&mut *tx)
        .await?;

        if started.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        // An idle row is not enough: a task still running on it holds the box
        // until its outcome has been recorded.
        let claimed = sqlx::query(
            r#"UPDATE sandboxes SET status = 'busy', current_task_id = ?, last_used_at = ?,
                   swarm_id = COALESCE(swarm_id, (SELECT swarm_id FROM tasks WHERE id = ?))
               WHERE id = ? AND status = 'idle'
                 AND NOT EXISTS (
                     SELECT 1 FROM tasks t
                     WHERE t.sandbox_id = sandboxes.id AND t.status = 'running' AND t.id != ?
                 )"#,
        )
        .bind(task_id.to_string())
        .bind(&now)
        .bind(task_id.to_string())
        .bind(sandbox_id.to_string())
        .bind(task_id.to_string())
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn transition(&self, task_id: Uuid, transition: TaskTransition) -> DomainResult<bool> {
        let now = format_datetime(Utc::now());
        let guard = transition
            .allowed_from()
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let target = transition.target().as_str();

        let query = match &transition {
            TaskTransition::Complete { .. } => format!(
                "UPDATE tasks SET status = '{target}', result = ?, error = NULL, sandbox_id = NULL,
                 retry_after = NULL, completed_at = ?, updated_at = ?
                 WHERE id = ? AND status IN ({guard})"
            ),
            TaskTransition::Requeue { .. } => format!(
                "UPDATE tasks SET status = '{target}', retry_count = ?, error = ?, sandbox_id = NULL,
                 retry_after = ?, updated_at = ? WHERE id = ? AND status IN ({guard})"
            ),
            TaskTransition::Fail { .. } => format!(
                "UPDATE tasks SET status = '{target}', retry_count = ?, error = ?, sandbox_id = NULL,
                 retry_after = NULL, completed_at = ?, updated_at = ?
                 WHERE id = ? AND status IN ({guard})"
            ),
            TaskTransition::Cancel => format!(
                "UPDATE tasks SET status = '{target}', sandbox_id = NULL, retry_after = NULL,
                 completed_at = ?, updated_at = ? WHERE id = ? AND status IN ({guard})"
            ),
            TaskTransition::Retry => format!(
                "UPDATE tasks SET status = '{target}', retry_count = 0, sandbox_id = NULL,
                 retry_after = NULL, error = NULL, result = NULL, started_at = NULL, completed_at = NULL,
                 updated_at = ? WHERE id = ? AND status IN ({guard})"
            ),
            TaskTransition::Recover => format!(
                "UPDATE tasks SET status = '{target}', sandbox_id = NULL, updated_at = ?
                 WHERE id = ? AND status IN ({guard})"
            ),
        };

        let mut q = sqlx::query(&query);
        q = match transition {
            TaskTransition::Complete { result } => q.bind(result).bind(now.clone()).bind(now),
            TaskTransition::Requeue { retry_count, error, retry_after } => q
                .bind(i64::from(retry_count))
                .bind(error)
                .bind(retry_after.map(format_datetime))
                .bind(now),
            TaskTransition::Fail { retry_count, error } => q
                .bind(i64::from(retry_count))
                .bind(error)
                .bind(now.clone())
                .bind(now),
            TaskTransition::Cancel => q.bind(now.clone()).bind(now),
            TaskTransition::Retry | TaskTransition::Recover => q.bind(now),
        };

        let result = q.bind(task_id.to_string()).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_log(&self, task_id: Uuid, stream: LogStream, line: &str) -> DomainResult<()> {
        sqlx::query("INSERT INTO task_logs (task_id, stream, line, created_at) VALUES (?, ?, ?, ?)")
            .bind(task_id.to_string())
            .bind(stream.as_str())
            .bind(line)
            .bind(format_datetime(Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn logs(
        &self,
        task_id: Uuid,
        after: Option<i64>,
        limit: usize,
    ) -> DomainResult<Vec<TaskLogEntry>> {
        let rows: Vec<(i64, String, String, String, String)> = sqlx::query_as(
            r#"SELECT seq, task_id, stream, line, created_at FROM task_logs
               WHERE task_id = ? AND seq > ? ORDER BY seq LIMIT ?"#,
        )
        .bind(task_id.to_string())
        .bind(after.unwrap_or(0))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(seq, task_id, stream, line, created_at)| {
                Ok(TaskLogEntry {
                    seq,
                    task_id: parse_uuid(&task_id)?,
                    stream: LogStream::from_str(&stream).ok_or_else(|| {
                        DomainError::SerializationError(format!("Invalid log stream: {stream}"))
                    })?,
                    line,
                    created_at: parse_datetime(&created_at)?,
                })
            })
            .collect()
    }
}

/// Find a path of dependency or trigger-after edges leading from `task_id`
/// back to itself.
async fn cycle_through(
    conn: &mut sqlx::SqliteConnection,
    task_id: Uuid,
) -> DomainResult<Option<Vec<Uuid>>> {
    // Rows are (node, predecessor) pairs, bounded by the number of edges
    let rows: Vec<(String, String)> = sqlx::query_as(
        r#"WITH RECURSIVE
               edges(source, target) AS (
                   SELECT task_id, depends_on_id FROM task_dependencies
                   UNION ALL
                   SELECT t.id, j.value FROM tasks t, json_each(t.triggers_after) j
                   WHERE t.swarm_id = (SELECT swarm_id FROM tasks WHERE id = ?1)
               ),
               reach(id, parent) AS (
                   SELECT target, source FROM edges WHERE source = ?1
                   UNION
                   SELECT e.target, e.source FROM edges e
                   INNER JOIN reach r ON e.source = r.id
                   WHERE r.id != ?1
               )
           SELECT id, parent FROM reach"#,
    )
    .bind(task_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    let mut parents: HashMap<Uuid, Uuid> = HashMap::new();
    for (id, parent) in rows {
        parents.entry(parse_uuid(&id)?).or_insert(parse_uuid(&parent)?);
    }
    if !parents.contains_key(&task_id) {
        return Ok(None);
    }

    let mut path = vec![task_id];
    let mut node = task_id;
    while let Some(&parent) = parents.get(&node) {
        path.push(parent);
        if parent == task_id || path.len() > parents.len() + 1 {
            break;
        }
        node = parent;
    }
    path.reverse();
    Ok(Some(path))
}

impl SqliteTaskRepository {
    async fn load_dependencies(&self, task: &mut Task) -> DomainResult<()> {
        let deps: Vec<(String,)> =
            sqlx::query_as("SELECT depends_on_id FROM task_dependencies WHERE task_id = ?")
                .bind(task.id.to_string())
                .fetch_all(&self.pool)
                .await?;

        task.depends_on = deps
            .into_iter()
            .map(|(id,)| parse_uuid(&id))
            .collect::<DomainResult<_>>()?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    swarm_id: String,
    title: String,
    description: Option<String>,
    status: String,
    priority: String,
    sandbox_id: Option<String>,
    triggers_after: Option<String>,
    result: Option<String>,
    error: Option<String>,
    tags: Option<String>,
    retry_count: i64,
    retry_after: Option<String>,
    created_at: String,
    updated_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl TryFrom<TaskRow> for Task {
    type Error = DomainError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;
        let priority = TaskPriority::from_str(&row.priority).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid priority: {}", row.priority))
        })?;

        Ok(Task {
            id: parse_uuid(&row.id)?,
            swarm_id: parse_uuid(&row.swarm_id)?,
            title: row.title,
            description: row.description.unwrap_or_default(),
            status,
            priority,
            sandbox_ref: parse_optional_uuid(row.sandbox_id)?,
            depends_on: Vec::new(),
            triggers_after: parse_json_or_default(row.triggers_after)?,
            result: row.result,
            error: row.error,
            tags: parse_json_or_default(row.tags)?,
            retry_count: u32::try_from(row.retry_count).unwrap_or_default(),
            retry_after: parse_optional_datetime(row.retry_after)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            started_at: parse_optional_datetime(row.started_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
        })
    }
}
