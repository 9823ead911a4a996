//! Task CLI commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::cli::context::AppContext;
use crate::cli::id_resolver::{resolve_swarm_id, resolve_task_id};
use crate::cli::output::{format_time, list_table, output, render_list, short_id, truncate, CommandOutput};
use crate::domain::models::{Task, TaskLogEntry, TaskPriority, TaskStatus};
use crate::domain::ports::TaskFilter;
use crate::infrastructure::config::AppConfig;
use crate::services::{NewTask, TaskUpdate};

#[derive(Args, Debug)]
pub struct TaskArgs {
    #[command(subcommand)]
    pub command: TaskCommands,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Create a task in a swarm
    Create {
        /// Swarm ID, prefix or name
        #[arg(short, long)]
        swarm: String,
        /// Task title
        title: String,
        /// Task description; SKILL: and CLI: lines become agent directives
        #[arg(short, long, default_value = "")]
        description: String,
        /// Priority (low, medium, high, urgent)
        #[arg(short, long, default_value = "medium")]
        priority: String,
        /// Task that must complete first (repeatable)
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
        /// Informational ordering edge (repeatable)
        #[arg(long = "after")]
        triggers_after: Vec<String>,
        /// Tag (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
    /// List tasks
    List {
        /// Filter by swarm ID, prefix or name
        #[arg(short, long)]
        swarm: Option<String>,
        /// Filter by status (pending, running, completed, failed, cancelled)
        #[arg(long)]
        status: Option<String>,
    },
    /// Show task details
    Show {
        /// Task ID or prefix
        id: String,
    },
    /// Edit a pending task
    Edit {
        /// Task ID or prefix
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long)]
        priority: Option<String>,
        /// Replace dependencies (repeatable)
        #[arg(long = "depends-on")]
        depends_on: Option<Vec<String>>,
        /// Replace ordering edges (repeatable)
        #[arg(long = "after")]
        triggers_after: Option<Vec<String>>,
        /// Replace tags (repeatable)
        #[arg(short, long = "tag")]
        tags: Option<Vec<String>>,
    },
    /// Reset a failed task to pending
    Retry {
        /// Task ID or prefix
        id: String,
    },
    /// Cancel a pending or running task
    Cancel {
        /// Task ID or prefix
        id: String,
    },
    /// Delete a task that is not running
    Delete {
        /// Task ID or prefix
        id: String,
    },
    /// Show a task's execution log
    Logs {
        /// Task ID or prefix
        id: String,
        /// Only lines after this sequence number
        #[arg(long)]
        after: Option<i64>,
        /// Maximum lines to show
        #[arg(short, long, default_value = "200")]
        limit: usize,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct TaskOutput {
    pub id: String,
    pub swarm_id: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub depends_on: Vec<String>,
    pub triggers_after: Vec<String>,
    pub tags: Vec<String>,
    pub retry_count: u32,
    pub retry_after: Option<String>,
    pub sandbox_ref: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl From<&Task> for TaskOutput {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.to_string(),
            swarm_id: task.swarm_id.to_string(),
            title: task.title.clone(),
            description: task.description.clone(),
            status: task.status.as_str().to_string(),
            priority: task.priority.as_str().to_string(),
            depends_on: task.depends_on.iter().map(Uuid::to_string).collect(),
            triggers_after: task.triggers_after.iter().map(Uuid::to_string).collect(),
            tags: task.tags.clone(),
            retry_count: task.retry_count,
            retry_after: task.retry_after.map(format_time),
            sandbox_ref: task.sandbox_ref.map(|id| id.to_string()),
            result: task.result.clone(),
            error: task.error.clone(),
            created_at: format_time(task.created_at),
            started_at: task.started_at.map(format_time),
            completed_at: task.completed_at.map(format_time),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct TaskListOutput {
    pub tasks: Vec<TaskOutput>,
    pub total: usize,
}

impl CommandOutput for TaskListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "title", "status", "priority", "retries", "deps"]);
        for task in &self.tasks {
            table.add_row(vec![
                task.id[..8].to_string(),
                truncate(&task.title, 40),
                task.status.clone(),
                task.priority.clone(),
                task.retry_count.to_string(),
                task.depends_on.len().to_string(),
            ]);
        }
        render_list("task", &table, self.total)
    }
}

#[derive(Debug, serde::Serialize)]
pub struct TaskDetailOutput {
    #[serde(flatten)]
    pub task: TaskOutput,
}

impl CommandOutput for TaskDetailOutput {
    fn to_human(&self) -> String {
        let t = &self.task;
        let mut lines = vec![
            format!("Task: {}", t.title),
            format!("ID: {}", t.id),
            format!("Swarm: {}", t.swarm_id),
            format!("Status: {}", t.status),
            format!("Priority: {}", t.priority),
            format!("Retries: {}", t.retry_count),
            format!("Created: {}", t.created_at),
        ];
        if let Some(retry_after) = &t.retry_after {
            lines.push(format!("Retry after: {retry_after}"));
        }
        if let Some(started) = &t.started_at {
            lines.push(format!("Started: {started}"));
        }
        if let Some(completed) = &t.completed_at {
            lines.push(format!("Completed: {completed}"));
        }
        if let Some(sandbox) = &t.sandbox_ref {
            lines.push(format!("Sandbox: {sandbox}"));
        }
        if !t.tags.is_empty() {
            lines.push(format!("Tags: {}", t.tags.join(", ")));
        }
        if !t.depends_on.is_empty() {
            lines.push("Depends on:".to_string());
            lines.extend(t.depends_on.iter().map(|d| format!("  - {d}")));
        }
        if !t.triggers_after.is_empty() {
            lines.push("After:".to_string());
            lines.extend(t.triggers_after.iter().map(|d| format!("  - {d}")));
        }
        if !t.description.is_empty() {
            lines.push(format!("\nDescription:\n{}", t.description));
        }
        if let Some(error) = &t.error {
            lines.push(format!("\nError: {error}"));
        }
        if let Some(result) = &t.result {
            lines.push(format!("\nResult:\n{result}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
pub struct TaskActionOutput {
    pub success: bool,
    pub message: String,
    pub task: Option<TaskOutput>,
}

impl CommandOutput for TaskActionOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }
}

impl TaskActionOutput {
    fn for_task(verb: &str, task: &Task) -> Self {
        Self {
            success: true,
            message: format!("Task {} ({}) {verb}", short_id(&task.id), truncate(&task.title, 40)),
            task: Some(TaskOutput::from(task)),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct TaskLogsOutput {
    pub task_id: String,
    pub entries: Vec<TaskLogEntry>,
}

impl CommandOutput for TaskLogsOutput {
    fn to_human(&self) -> String {
        if self.entries.is_empty() {
            return "No log lines.".to_string();
        }
        self.entries
            .iter()
            .map(|e| {
                format!(
                    "{:>6} {} [{}] {}",
                    e.seq,
                    e.created_at.format("%H:%M:%S"),
                    e.stream.as_str(),
                    e.line
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn parse_priority(s: &str) -> Result<TaskPriority> {
    TaskPriority::from_str(s).ok_or_else(|| anyhow::anyhow!("Invalid priority: {s}"))
}

async fn resolve_all(pool: &SqlitePool, prefixes: &[String]) -> Result<Vec<Uuid>> {
    let mut ids = Vec::with_capacity(prefixes.len());
    for prefix in prefixes {
        ids.push(resolve_task_id(pool, prefix).await?);
    }
    Ok(ids)
}

pub async fn execute(args: TaskArgs, config: &AppConfig, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let service = ctx.task_service();

    match args.command {
        TaskCommands::Create {
            swarm,
            title,
            description,
            priority,
            depends_on,
            triggers_after,
            tags,
        } => {
            let swarm_id = resolve_swarm_id(&ctx.pool, &swarm).await?;
            let input = NewTask {
                description,
                priority: parse_priority(&priority)?,
                depends_on: resolve_all(&ctx.pool, &depends_on).await?,
                triggers_after: resolve_all(&ctx.pool, &triggers_after).await?,
                tags,
                ..NewTask::new(swarm_id, title)
            };
            let task = service.create(input).await.context("Failed to create task")?;
            output(&TaskActionOutput::for_task("created", &task), json_mode);
        }
        TaskCommands::List { swarm, status } => {
            let swarm_id = match swarm {
                Some(s) => Some(resolve_swarm_id(&ctx.pool, &s).await?),
                None => None,
            };
            let status = status
                .map(|s| {
                    TaskStatus::from_str(&s).ok_or_else(|| anyhow::anyhow!("Invalid status: {s}"))
                })
                .transpose()?;
            let tasks = service
                .list(TaskFilter { swarm_id, status })
                .await
                .context("Failed to list tasks")?;
            let out = TaskListOutput {
                total: tasks.len(),
                tasks: tasks.iter().map(TaskOutput::from).collect(),
            };
            output(&out, json_mode);
        }
        TaskCommands::Show { id } => {
            let id = resolve_task_id(&ctx.pool, &id).await?;
            let task = service.get(id).await?;
            output(&TaskDetailOutput { task: TaskOutput::from(&task) }, json_mode);
        }
        TaskCommands::Edit {
            id,
            title,
            description,
            priority,
            depends_on,
            triggers_after,
            tags,
        } => {
            let id = resolve_task_id(&ctx.pool, &id).await?;
            let depends_on = match depends_on {
                Some(d) => Some(resolve_all(&ctx.pool, &d).await?),
                None => None,
            };
            let triggers_after = match triggers_after {
                Some(t) => Some(resolve_all(&ctx.pool, &t).await?),
                None => None,
            };
            let update = TaskUpdate {
                title,
                description,
                priority: priority.as_deref().map(parse_priority).transpose()?,
                tags,
                depends_on,
                triggers_after,
            };
            let task = service.update(id, update).await.context("Failed to update task")?;
            output(&TaskActionOutput::for_task("updated", &task), json_mode);
        }
        TaskCommands::Retry { id } => {
            let id = resolve_task_id(&ctx.pool, &id).await?;
            let task = service.retry(id).await?;
            output(&TaskActionOutput::for_task("queued for retry", &task), json_mode);
        }
        TaskCommands::Cancel { id } => {
            let id = resolve_task_id(&ctx.pool, &id).await?;
            let task = service.cancel(id).await?;
            output(&TaskActionOutput::for_task("cancelled", &task), json_mode);
        }
        TaskCommands::Delete { id } => {
            let id = resolve_task_id(&ctx.pool, &id).await?;
            let task = service.get(id).await?;
            service.delete(id).await?;
            output(&TaskActionOutput::for_task("deleted", &task), json_mode);
        }
        TaskCommands::Logs { id, after, limit } => {
            let id = resolve_task_id(&ctx.pool, &id).await?;
            let entries = service.logs(id, after, limit).await?;
            output(
                &TaskLogsOutput {
                    task_id: id.to_string(),
                    entries,
                },
                json_mode,
            );
        }
    }

    Ok(())
}
