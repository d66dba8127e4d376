//! unpkg CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use unpkg_cli::cmd;
use unpkg_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; stdout is reserved for `get` output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config.to_config();

    match cli.command {
        Commands::Serve { listen, metrics } => cmd::serve::serve(&config, listen, metrics).await,
        Commands::Get { identifier } => cmd::get::get(&config, &identifier).await,
    }
}
