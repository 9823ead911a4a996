//! Sandbox pool CLI commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::cli::context::AppContext;
use crate::cli::id_resolver::resolve_sandbox_id;
use crate::cli::output::{list_table, output, short_id, ActionOutput, CommandOutput};
use crate::infrastructure::config::AppConfig;
use crate::services::PoolStatus;

#[derive(Args, Debug)]
pub struct PoolArgs {
    #[command(subcommand)]
    pub command: PoolCommands,
}

#[derive(Subcommand, Debug)]
pub enum PoolCommands {
    /// Show pool capacity and live sandboxes
    Status,
    /// Destroy a sandbox
    Destroy {
        /// Sandbox ID, prefix or provider reference
        id: String,
    },
    /// Destroy idle sandboxes past the idle timeout
    Cleanup,
}

#[derive(Debug, serde::Serialize)]
pub struct PoolStatusOutput {
    #[serde(flatten)]
    pub status: PoolStatus,
}

impl CommandOutput for PoolStatusOutput {
    fn to_human(&self) -> String {
        let s = &self.status;
        let mut lines = vec![
            format!("Provider: {}", s.provider),
            format!(
                "Sandboxes: {}/{} ({} busy, {} idle, {} provisioning)",
                s.total, s.capacity, s.busy, s.idle, s.provisioning
            ),
            format!("Destroyed (retained): {}", s.destroyed),
        ];
        if !s.sandboxes.is_empty() {
            let mut table = list_table(&["id", "ref", "swarm", "snapshot", "status", "task", "idle"]);
            for sb in &s.sandboxes {
                table.add_row(vec![
                    short_id(&sb.id),
                    sb.provider_ref.clone(),
                    sb.swarm_id.as_ref().map(short_id).unwrap_or_else(|| "-".to_string()),
                    sb.snapshot.clone(),
                    sb.status.as_str().to_string(),
                    sb.current_task_id
                        .as_ref()
                        .map(short_id)
                        .unwrap_or_else(|| "-".to_string()),
                    format!("{}s", sb.idle_seconds),
                ]);
            }
            lines.push(String::new());
            lines.push(table.to_string());
        }
        lines.join("\n")
    }
}

pub async fn execute(args: PoolArgs, config: &AppConfig, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let pool = ctx.pool_manager();

    match args.command {
        PoolCommands::Status => {
            let orchestration = ctx.orchestration().await?;
            let status = pool
                .status(&orchestration)
                .await
                .context("Failed to read pool status")?;
            output(&PoolStatusOutput { status }, json_mode);
        }
        PoolCommands::Destroy { id } => {
            let id = resolve_sandbox_id(&ctx.pool, &id).await?;
            let destroyed = pool.destroy(id).await?;
            let message = if destroyed {
                format!("Sandbox {} destroyed", short_id(&id))
            } else {
                format!("Sandbox {} was already destroyed", short_id(&id))
            };
            output(&ActionOutput::ok(message, id), json_mode);
        }
        PoolCommands::Cleanup => {
            let orchestration = ctx.orchestration().await?;
            let swept = pool
                .sweep_idle(&orchestration)
                .await
                .context("Failed to clean up idle sandboxes")?;
            let message = format!("Destroyed {} idle sandbox(es)", swept.len());
            output(&ActionOutput::ok(message, swept), json_mode);
        }
    }

    Ok(())
}
