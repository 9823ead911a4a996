//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};

use crate::cli::commands::{
    config::ConfigArgs, init::InitArgs, pool::PoolArgs, run::RunArgs, swarm::SwarmArgs,
    task::TaskArgs,
};

#[derive(Parser, Debug)]
#[command(name = "swarm-dispatch")]
#[command(about = "Swarm Dispatch - task orchestration over pooled agent sandboxes", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize the project directory, config file and database
    Init(InitArgs),

    /// Swarm management commands
    Swarm(SwarmArgs),

    /// Task management commands
    Task(TaskArgs),

    /// Sandbox pool commands
    Pool(PoolArgs),

    /// Orchestration config commands
    Config(ConfigArgs),

    /// Run the trigger engine
    Run(RunArgs),
}
