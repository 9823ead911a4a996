//! Orchestration config CLI commands.
//!
//! Edits go to the stored record and are picked up by a running engine on
//! its next cycle.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::cli::context::AppContext;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::OrchestrationConfig;
use crate::domain::ports::ConfigRepository;
use crate::infrastructure::config::AppConfig;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the stored orchestration config
    Show,
    /// Change one orchestration setting
    Set {
        /// Setting name, e.g. max_retries or pool_max_sandboxes
        key: String,
        /// New value
        value: String,
    },
    /// Restore the orchestration config from the config file
    Reset,
}

#[derive(Debug, serde::Serialize)]
pub struct ConfigOutput {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub config: OrchestrationConfig,
}

impl CommandOutput for ConfigOutput {
    fn to_human(&self) -> String {
        let c = &self.config;
        let mut lines = Vec::new();
        if let Some(message) = &self.message {
            lines.push(message.clone());
            lines.push(String::new());
        }
        lines.extend([
            format!("pool_max_sandboxes:    {}", c.pool_max_sandboxes),
            format!("pool_idle_timeout:     {}s", c.pool_idle_timeout_secs),
            format!("default_snapshot:      {}", c.default_snapshot),
            format!("trigger_enabled:       {}", c.trigger_enabled),
            format!("trigger_poll_interval: {}s", c.trigger_poll_interval_secs),
            format!("execution_timeout:     {}s", c.execution_timeout_secs),
            format!("max_retries:           {}", c.max_retries),
            format!("retry_base_delay:      {}s", c.retry_base_delay_secs),
            format!("retry_max_delay:       {}s", c.retry_max_delay_secs),
        ]);
        lines.join("\n")
    }
}

pub async fn execute(args: ConfigArgs, config: &AppConfig, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;

    let out = match args.command {
        ConfigCommands::Show => ConfigOutput {
            success: true,
            message: None,
            config: ctx.orchestration().await?,
        },
        ConfigCommands::Set { key, value } => {
            let mut stored = ctx.orchestration().await?;
            stored.set(&key, &value)?;
            ctx.config_repo
                .save(&stored)
                .await
                .context("Failed to save orchestration config")?;
            tracing::info!(key = %key, value = %value, "Orchestration config updated");
            ConfigOutput {
                success: true,
                message: Some(format!("Set {key} = {value}")),
                config: stored,
            }
        }
        ConfigCommands::Reset => {
            ctx.config_repo
                .save(&config.orchestration)
                .await
                .context("Failed to reset orchestration config")?;
            ConfigOutput {
                success: true,
                message: Some("Orchestration config reset".to_string()),
                config: config.orchestration.clone(),
            }
        }
    };

    output(&out, json_mode);
    Ok(())
}
