//! heatgrid CLI - Run tiled heat-stencil simulations.
//!
//! # Commands
//!
//! - `heatgrid run` - Run a simulation from a configuration file and/or flags
//! - `heatgrid config` - Print, write or validate a configuration file
//!
//! # Examples
//!
//! ```bash
//! # 2x2 workers on 128x128 tiles, dumping fields into ./out
//! heatgrid run --workers-per-side 2 --tile-size 128 --output out
//!
//! # Start from a file and override the iteration limit
//! heatgrid config --output run.toml
//! heatgrid run --config run.toml --iterations 5000
//! ```

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;

use commands::run::RunArgs;

/// heatgrid - five-point heat stencil with overlapped halo exchange
#[derive(Parser)]
#[command(name = "heatgrid")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation
    Run(RunArgs),

    /// Print the default configuration, write it, or validate a file
    Config {
        /// Write the default configuration to this file
        #[arg(short, long)]
        output: Option<String>,

        /// Validate this configuration file
        #[arg(long, conflicts_with = "output")]
        check: Option<String>,
    },
}

fn setup_logging(verbose: bool, quiet: bool) {
    // RUST_LOG wins over the flags when set.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if quiet {
            EnvFilter::new("error")
        } else if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(verbose)
        .without_time()
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Run(args) => commands::run::execute(args, cli.quiet),
        Commands::Config { output, check } => {
            commands::config::execute(output.as_deref(), check.as_deref())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
