//! Swarm Dispatch CLI entry point.

use anyhow::Context;
use clap::Parser;

use swarm_dispatch::cli::{commands, handle_error, Cli, Commands};
use swarm_dispatch::infrastructure::config::ConfigLoader;
use swarm_dispatch::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ConfigLoader::load().context("Failed to load configuration") {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };

    // Held for the life of the process so buffered file logs are flushed
    let _logger = match LoggerImpl::init(&config.logging).context("Failed to initialize logging") {
        Ok(logger) => logger,
        Err(err) => handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(args, &config, cli.json).await,
        Commands::Swarm(args) => commands::swarm::execute(args, &config, cli.json).await,
        Commands::Task(args) => commands::task::execute(args, &config, cli.json).await,
        Commands::Pool(args) => commands::pool::execute(args, &config, cli.json).await,
        Commands::Config(args) => commands::config::execute(args, &config, cli.json).await,
        Commands::Run(args) => commands::run::execute(args, &config, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
