//! `heatgrid run` command - Run a simulation.

use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use tracing::debug;

use heatgrid::{BoundaryPolicy, InitialCondition, Simulation, SimulationConfig};

use crate::error::CliResult;

use super::{parse_boundary, parse_initial};

/// Overrides applied on top of the configuration file or the defaults.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Cells per tile side
    #[arg(short = 's', long)]
    pub tile_size: Option<usize>,

    /// Workers per domain side
    #[arg(short, long)]
    pub workers_per_side: Option<usize>,

    /// Iteration limit
    #[arg(short = 'n', long)]
    pub iterations: Option<u64>,

    /// Iterations between convergence checks
    #[arg(long)]
    pub check_interval: Option<u64>,

    /// Convergence threshold on the global sum of squared differences
    #[arg(short, long)]
    pub epsilon: Option<f64>,

    /// Row-direction coefficient
    #[arg(long)]
    pub cx: Option<f32>,

    /// Column-direction coefficient
    #[arg(long)]
    pub cy: Option<f32>,

    /// Compute threads per worker
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Physical edge fallback: mirror, fixed:<value>
    #[arg(short, long, value_parser = parse_boundary)]
    pub boundary: Option<BoundaryPolicy>,

    /// Initial condition: tile, global, uniform:<value>
    #[arg(short, long, value_parser = parse_initial)]
    pub initial: Option<InitialCondition>,

    /// Directory for initial/final field dumps and the run summary
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl RunArgs {
    /// Load the base configuration and apply every override.
    pub fn resolve(&self) -> CliResult<SimulationConfig> {
        let mut config = match &self.config {
            Some(path) => SimulationConfig::load(path)?,
            None => SimulationConfig::default(),
        };

        if let Some(v) = self.tile_size {
            config.tile_size = v;
        }
        if let Some(v) = self.workers_per_side {
            config.workers_per_side = v;
        }
        if let Some(v) = self.iterations {
            config.max_iterations = v;
        }
        if let Some(v) = self.check_interval {
            config.check_interval = v;
        }
        if let Some(v) = self.epsilon {
            config.epsilon = v;
        }
        if let Some(v) = self.cx {
            config.stencil.cx = v;
        }
        if let Some(v) = self.cy {
            config.stencil.cy = v;
        }
        if let Some(v) = self.threads {
            config.stencil.max_threads = v;
        }
        if let Some(v) = self.boundary {
            config.boundary = v;
        }
        if let Some(v) = self.initial {
            config.initial = v;
        }
        if let Some(dir) = &self.output {
            config.output_dir = Some(dir.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

/// Execute the `run` command.
pub fn execute(args: &RunArgs, quiet: bool) -> CliResult<()> {
    let config = args.resolve()?;
    debug!("Resolved configuration: {:?}", config);
    let output_dir = config.output_dir.clone();

    if !quiet {
        println!("{} Running heat stencil", "→".bright_cyan());
        println!(
            "  {} Domain: {}x{} cells in {}x{} tiles",
            "•".dimmed(),
            config.tile_size * config.workers_per_side,
            config.tile_size * config.workers_per_side,
            config.workers_per_side,
            config.workers_per_side
        );
        println!(
            "  {} Coefficients: cx = {}, cy = {}",
            "•".dimmed(),
            config.stencil.cx,
            config.stencil.cy
        );
        println!(
            "  {} Up to {} iteration(s), epsilon {:e} every {}",
            "•".dimmed(),
            config.max_iterations,
            config.epsilon,
            config.check_interval
        );
        println!();
    }

    let report = Simulation::new(config)?.run()?;
    let summary = report.summary();

    if let Some(dir) = output_dir {
        let path = dir.join("summary.toml");
        summary.save(&path)?;
        if !quiet {
            println!(
                "  {} Wrote fields and summary to {}",
                "•".dimmed(),
                dir.display().to_string().bright_white()
            );
        }
    }

    if !quiet {
        let status = if report.converged {
            "converged".bright_green()
        } else {
            "iteration limit".yellow()
        };
        println!(
            "{} {} iteration(s) in {:.3}s ({})",
            "✓".bright_green(),
            report.iterations.to_string().bright_white(),
            summary.elapsed_secs,
            status
        );
        if let Some(residual) = report.residual {
            println!("  {} Residual: {:.6e}", "•".dimmed(), residual);
        }
        println!(
            "  {} Halo messages: {} delivered, {} failed",
            "•".dimmed(),
            summary.messages_delivered,
            summary.messages_failed
        );
    }

    Ok(())
}
