//! Swarm CLI commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::cli::context::AppContext;
use crate::cli::id_resolver::resolve_swarm_id;
use crate::cli::output::{format_time, list_table, output, render_list, short_id, truncate, CommandOutput};
use crate::domain::models::{Swarm, SwarmStatus};
use crate::domain::ports::TaskStatusCounts;
use crate::infrastructure::config::AppConfig;

#[derive(Args, Debug)]
pub struct SwarmArgs {
    #[command(subcommand)]
    pub command: SwarmCommands,
}

#[derive(Subcommand, Debug)]
pub enum SwarmCommands {
    /// Create a new swarm
    Create {
        /// Swarm name
        name: String,
        /// Swarm description
        #[arg(short, long, default_value = "")]
        description: String,
        /// Opaque reference to the project the swarm works on
        #[arg(long)]
        project: Option<String>,
    },
    /// List swarms
    List {
        /// Filter by status (active, paused, stopped)
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Show swarm details and task counts
    Show {
        /// Swarm ID, prefix or name
        id: String,
    },
    /// Pause dispatch for a swarm
    Pause {
        /// Swarm ID, prefix or name
        id: String,
    },
    /// Resume a paused swarm
    Resume {
        /// Swarm ID, prefix or name
        id: String,
    },
    /// Stop a swarm permanently
    Stop {
        /// Swarm ID, prefix or name
        id: String,
    },
    /// Delete a swarm and its tasks
    Delete {
        /// Swarm ID, prefix or name
        id: String,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct SwarmOutput {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: String,
    pub project_ref: Option<String>,
    pub created_at: String,
}

impl From<&Swarm> for SwarmOutput {
    fn from(swarm: &Swarm) -> Self {
        Self {
            id: swarm.id.to_string(),
            name: swarm.name.clone(),
            description: swarm.description.clone(),
            status: swarm.status.as_str().to_string(),
            project_ref: swarm.project_ref.clone(),
            created_at: format_time(swarm.created_at),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct SwarmListOutput {
    pub swarms: Vec<SwarmOutput>,
    pub total: usize,
}

impl CommandOutput for SwarmListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "name", "status", "created"]);
        for swarm in &self.swarms {
            table.add_row(vec![
                swarm.id[..8].to_string(),
                truncate(&swarm.name, 30),
                swarm.status.clone(),
                swarm.created_at.clone(),
            ]);
        }
        render_list("swarm", &table, self.total)
    }
}

#[derive(Debug, serde::Serialize)]
pub struct SwarmDetailOutput {
    pub swarm: SwarmOutput,
    pub tasks: TaskStatusCounts,
}

impl CommandOutput for SwarmDetailOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Swarm: {}", self.swarm.name),
            format!("ID: {}", self.swarm.id),
            format!("Status: {}", self.swarm.status),
        ];
        if !self.swarm.description.is_empty() {
            lines.push(format!("Description: {}", self.swarm.description));
        }
        if let Some(project) = &self.swarm.project_ref {
            lines.push(format!("Project: {project}"));
        }
        lines.push(format!("Created: {}", self.swarm.created_at));
        lines.push(format!(
            "\nTasks: {} total ({} pending, {} running, {} completed, {} failed, {} cancelled)",
            self.tasks.total(),
            self.tasks.pending,
            self.tasks.running,
            self.tasks.completed,
            self.tasks.failed,
            self.tasks.cancelled
        ));
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
pub struct SwarmActionOutput {
    pub success: bool,
    pub message: String,
    pub swarm: Option<SwarmOutput>,
}

impl CommandOutput for SwarmActionOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }
}

impl SwarmActionOutput {
    fn for_swarm(verb: &str, swarm: &Swarm) -> Self {
        Self {
            success: true,
            message: format!("Swarm {} ({}) {verb}", swarm.name, short_id(&swarm.id)),
            swarm: Some(SwarmOutput::from(swarm)),
        }
    }
}

pub async fn execute(args: SwarmArgs, config: &AppConfig, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let service = ctx.swarm_service();

    match args.command {
        SwarmCommands::Create { name, description, project } => {
            let swarm = service
                .create(name, description, project)
                .await
                .context("Failed to create swarm")?;
            output(&SwarmActionOutput::for_swarm("created", &swarm), json_mode);
        }
        SwarmCommands::List { status } => {
            let status = status
                .map(|s| {
                    SwarmStatus::from_str(&s).ok_or_else(|| anyhow::anyhow!("Invalid status: {s}"))
                })
                .transpose()?;
            let swarms = service.list(status).await.context("Failed to list swarms")?;
            let out = SwarmListOutput {
                total: swarms.len(),
                swarms: swarms.iter().map(SwarmOutput::from).collect(),
            };
            output(&out, json_mode);
        }
        SwarmCommands::Show { id } => {
            let id = resolve_swarm_id(&ctx.pool, &id).await?;
            let stats = service.stats(id).await?;
            let out = SwarmDetailOutput {
                swarm: SwarmOutput::from(&stats.swarm),
                tasks: stats.counts,
            };
            output(&out, json_mode);
        }
        SwarmCommands::Pause { id } => {
            let id = resolve_swarm_id(&ctx.pool, &id).await?;
            let swarm = service.pause(id).await?;
            output(&SwarmActionOutput::for_swarm("paused", &swarm), json_mode);
        }
        SwarmCommands::Resume { id } => {
            let id = resolve_swarm_id(&ctx.pool, &id).await?;
            let swarm = service.resume(id).await?;
            output(&SwarmActionOutput::for_swarm("resumed", &swarm), json_mode);
        }
        SwarmCommands::Stop { id } => {
            let id = resolve_swarm_id(&ctx.pool, &id).await?;
            let swarm = service.stop(id).await?;
            output(&SwarmActionOutput::for_swarm("stopped", &swarm), json_mode);
        }
        SwarmCommands::Delete { id } => {
            let id = resolve_swarm_id(&ctx.pool, &id).await?;
            let swarm = service.get(id).await?;
            service.delete(id).await?;
            output(&SwarmActionOutput::for_swarm("deleted", &swarm), json_mode);
        }
    }

    Ok(())
}
