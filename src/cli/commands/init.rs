//! Init command: create the project directory, config file and database.

use anyhow::{bail, Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};

use crate::cli::context::AppContext;
use crate::cli::output::{output, CommandOutput};
use crate::domain::ports::ConfigRepository;
use crate::infrastructure::config::{AppConfig, ConfigLoader, PROJECT_DIR};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config file and reset the stored orchestration config
    #[arg(short, long)]
    pub force: bool,

    /// Directory to initialize (defaults to the current directory)
    #[arg(long)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub project_dir: String,
    pub config_path: String,
    pub database_path: String,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        [
            self.message.clone(),
            format!("  Project:  {}", self.project_dir),
            format!("  Config:   {}", self.config_path),
            format!("  Database: {}", self.database_path),
        ]
        .join("\n")
    }
}

pub async fn execute(args: InitArgs, config: &AppConfig, json_mode: bool) -> Result<()> {
    let root = args.path.unwrap_or_else(|| PathBuf::from("."));
    let project_dir = root.join(PROJECT_DIR);
    let config_path = project_dir.join("config.yaml");

    if config_path.exists() && !args.force {
        bail!(
            "Project already initialized at {}. Use --force to reinitialize.",
            project_dir.display()
        );
    }

    std::fs::create_dir_all(project_dir.join("sandboxes"))
        .with_context(|| format!("Failed to create {}", project_dir.display()))?;

    let mut project_config = config.clone();
    project_config.database.path = relocate(&root, &config.database.path);
    project_config.provider.work_root = root.join(&config.provider.work_root);

    let yaml = ConfigLoader::to_yaml(config).context("Failed to render config")?;
    std::fs::write(&config_path, yaml)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    let ctx = AppContext::connect(&project_config).await?;
    if args.force {
        ctx.config_repo
            .save(&config.orchestration)
            .await
            .context("Failed to reset orchestration config")?;
    } else {
        ctx.orchestration().await?;
    }

    tracing::info!(project_dir = %project_dir.display(), "Project initialized");

    let result = InitOutput {
        success: true,
        message: "Initialized swarm-dispatch project.".to_string(),
        project_dir: project_dir.display().to_string(),
        config_path: config_path.display().to_string(),
        database_path: project_config.database.path,
    };
    output(&result, json_mode);
    Ok(())
}

/// Resolve a relative database path against the project root.
fn relocate(root: &Path, db_path: &str) -> String {
    if db_path.starts_with("sqlite:") || Path::new(db_path).is_absolute() {
        db_path.to_string()
    } else {
        root.join(db_path).display().to_string()
    }
}
