mod cli;
mod service;

use clap::Parser;
use cli::{Cli, Commands};
use partitioner::config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let driver = service::connect(&config, cli.memory).await?;

    match cli.command {
        Commands::Run => service::run(&config, driver).await?,
        Commands::Once(args) => service::once(&config, driver, args.dry_run, args.at).await?,
        Commands::Plan(args) => service::plan(&config, driver, args.at).await?,
        Commands::Status(args) => service::status(&config, driver, args.at).await?,
    }

    Ok(())
}
