//! Flare CLI
//!
//! Low-latency X11 screen capture with optional NVENC encoding.
//!
//! # Usage
//!
//! ```bash
//! # List available sources
//! flare list
//!
//! # Record a monitor to a file until Ctrl+C
//! flare record --source Monitor-0 --preset 1080p60
//!
//! # Show backends and NVIDIA support
//! flare info
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Flare - low-latency screen capture
#[derive(Parser)]
#[command(name = "flare")]
#[command(author = "GhostKellz")]
#[command(version)]
#[command(about = "Low-latency X11 screen capture with NVENC hardware encoding", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available capture sources
    #[command(alias = "ls")]
    List(commands::ListArgs),

    /// Capture a source and write the frames to a file
    Record(commands::RecordArgs),

    /// Show display, backend and NVENC information
    Info,

    /// Manage the configuration file
    Config(commands::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("flare_core={}", level).parse()?)
                .add_directive(format!("flare={}", level).parse()?),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::List(args) => commands::list(args).await?,
        Commands::Record(args) => commands::record(args).await?,
        Commands::Info => commands::info().await?,
        Commands::Config(args) => commands::config(args).await?,
    }

    Ok(())
}
