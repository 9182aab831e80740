//! fcgi-container - FastCGI application container.
//!
//! This is the entry point for the `fcgi-container` CLI:
//!
//! - Running a container from a configuration file (`fcgi-container run`)
//! - Checking a configuration file (`fcgi-container check`)
//! - Talking to a running container's monitor (`fcgi-container info`,
//!   `fcgi-container stop`)
//!
//! See `fcgi-container --help` for full usage information.

#![allow(clippy::redundant_pub_crate)] // Explicit pub(crate) documents intent, aids refactoring

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

const AFTER_HELP: &str = "\
EXAMPLES:
  fcgi-container run -c container.toml      Serve until SIGINT/SIGTERM or a monitor stop
  fcgi-container check -c container.toml    Validate a configuration file
  fcgi-container info -m 127.0.0.1:9999     Print the status document
  fcgi-container stop -m 127.0.0.1:9999     Ask a running container to stop";

#[derive(Parser)]
#[command(name = "fcgi-container")]
#[command(version)]
#[command(about = "FastCGI application container")]
#[command(after_help = AFTER_HELP)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose/debug output for any command
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the container and serve until stopped
    Run {
        /// Configuration file
        #[arg(short, long, default_value = "container.toml")]
        config: PathBuf,
    },
    /// Validate a configuration file and print warnings
    Check {
        /// Configuration file
        #[arg(short, long, default_value = "container.toml")]
        config: PathBuf,
    },
    /// Print the status document of a running container
    Info {
        /// Monitor address (host:port)
        #[arg(short, long)]
        monitor: String,
    },
    /// Ask a running container to stop
    Stop {
        /// Monitor address (host:port)
        #[arg(short, long)]
        monitor: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => commands::run::execute(&config, cli.verbose).await?,
        Commands::Check { config } => commands::check::execute(&config)?,
        Commands::Info { monitor } => commands::monitor::info(&monitor).await?,
        Commands::Stop { monitor } => commands::monitor::stop(&monitor).await?,
    }

    Ok(())
}
