//! Backend Interfaces interop server
//!
//! Accepts Join, Rejoin, AppSKey and HomeNS requests from Network Servers
//! and Application Servers and relays them to the configured Join Servers.

use std::process::ExitCode;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use interop_server::{run_server, App, ServerConfig};

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
        EnvFilter::new(format!("interop={}", level))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .json()
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Fatal error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::GenerateConfig) => {
            println!("{}", ServerConfig::generate_sample_config());
            return Ok(());
        }
        Some(Commands::CheckConfig) => {
            let config = ServerConfig::load(&cli.config)?;
            App::build(&config)?;
            println!("Configuration OK");
            return Ok(());
        }
        Some(Commands::Run) | None => {}
    }

    let config = ServerConfig::load(&cli.config)?;

    tracing::info!(
        "Starting interop server v{}",
        env!("CARGO_PKG_VERSION")
    );

    run_server(config).await
}
