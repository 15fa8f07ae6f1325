//! crmsync CLI
//!
//! Runs the reconciliation engine against file-backed stores.
//!
//! # Commands
//!
//! - `run` - Run one cycle, or poll until interrupted
//! - `inspect` - Summarize both stores of a state file
//! - `version` - Show version information

mod commands;
mod error;
mod manifest;
mod state;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// crmsync command-line tools.
#[derive(Parser)]
#[command(name = "crmsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the stores of a state file
    Run {
        /// State file holding both stores
        #[arg(short, long)]
        state: PathBuf,

        /// Mapping manifest
        #[arg(short, long)]
        mappings: PathBuf,

        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,

        /// Seconds between the starts of two cycles
        #[arg(short, long, default_value = "5")]
        interval: u64,

        /// Seconds the query window trails the clock
        #[arg(short, long, default_value = "0")]
        delay: u64,

        /// File recording the last completed cycle
        #[arg(short, long)]
        tracker: Option<PathBuf>,
    },

    /// Summarize both stores of a state file
    Inspect {
        /// State file holding both stores
        #[arg(short, long)]
        state: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            state,
            mappings,
            once,
            interval,
            delay,
            tracker,
        } => {
            let options = commands::run::RunOptions {
                state,
                mappings,
                once,
                interval: std::time::Duration::from_secs(interval),
                delay: std::time::Duration::from_secs(delay),
                tracker,
            };
            commands::run::run(&options)?;
        }
        Commands::Inspect { state, format } => {
            commands::inspect::run(&state, &format)?;
        }
        Commands::Version => {
            println!("crmsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
