//! Run command: drive the trigger engine in the foreground.

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;

use crate::application::{CycleReport, EngineStats};
use crate::cli::context::AppContext;
use crate::cli::output::{output, short_id, CommandOutput};
use crate::domain::models::RetryDecision;
use crate::infrastructure::config::AppConfig;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run a single dispatch cycle, wait for its executions, then exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct CycleOutput {
    pub success: bool,
    #[serde(flatten)]
    pub report: CycleReport,
}

impl CommandOutput for CycleOutput {
    fn to_human(&self) -> String {
        let r = &self.report;
        if r.disabled {
            return "Trigger is disabled (trigger_enabled = false); nothing dispatched.".to_string();
        }

        let mut lines = vec![format!("Dispatched {} task(s)", r.dispatched.len())];
        if !r.swept.is_empty() {
            lines.push(format!("Evicted {} idle sandbox(es)", r.swept.len()));
        }
        if r.exhausted {
            lines.push("Pool capacity reached; remaining work waits for the next cycle".to_string());
        }
        for id in &r.provision_failures {
            lines.push(format!("  {} provisioning failed", short_id(id)));
        }
        for blocked in &r.blocked {
            lines.push(format!(
                "  {} blocked by {} ({})",
                short_id(&blocked.task_id),
                short_id(&blocked.blocker_id),
                blocked.blocker_status.as_str()
            ));
        }
        for settled in &r.outcomes {
            let decision = match settled.decision {
                RetryDecision::Completed => "completed".to_string(),
                RetryDecision::Requeue { retry_count } => format!("requeued (attempt {retry_count})"),
                RetryDecision::Failed { retry_count } => format!("failed after {retry_count} attempt(s)"),
                RetryDecision::Skipped => "unchanged".to_string(),
            };
            lines.push(format!("  {} {} -> {decision}", short_id(&settled.task_id), settled.outcome));
        }
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
pub struct RunOutput {
    pub success: bool,
    pub stats: EngineStats,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let s = &self.stats;
        format!(
            "Trigger engine stopped: {} dispatched, {} completed, {} requeued, {} failed",
            s.dispatched, s.completed, s.requeued, s.failed
        )
    }
}

pub async fn execute(args: RunArgs, config: &AppConfig, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    ctx.orchestration().await?;
    let engine = ctx.trigger_engine();

    if args.once {
        engine
            .recover_orphans()
            .await
            .context("Failed to recover orphaned tasks")?;
        let report = engine.run_once().await.context("Dispatch cycle failed")?;
        output(&CycleOutput { success: true, report }, json_mode);
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received; shutting down");
        }
        signal.cancel();
    });

    if !json_mode {
        eprintln!("Trigger engine running. Press Ctrl-C to stop.");
    }
    engine.run(shutdown).await.context("Trigger engine halted")?;

    output(
        &RunOutput {
            success: true,
            stats: engine.stats().await,
        },
        json_mode,
    );
    Ok(())
}
