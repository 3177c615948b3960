mod cli;
mod domain;
mod fetch;
mod runner;
mod stats;
mod utils;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // A missing --url fails here, before any worker starts.
    let cli = cli::Cli::parse();

    runner::dispatcher::run(&cli).await?;
    Ok(())
}
