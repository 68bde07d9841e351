//! CLI arguments for the interop server

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Backend Interfaces server - Join Server relay with mTLS and token auth
#[derive(Parser, Debug)]
#[command(name = "interop-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(short, long, default_value = "interop.yml", global = true, env = "INTEROP_CONFIG")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the server (default)
    Run,

    /// Print a sample configuration file
    GenerateConfig,

    /// Load and validate the configuration, including Join Server documents
    CheckConfig,
}
