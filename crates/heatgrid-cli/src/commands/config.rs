//! `heatgrid config` command - Print or write a configuration file.

use std::path::Path;

use colored::Colorize;

use heatgrid::SimulationConfig;

use crate::error::CliResult;

/// Execute the `config` command.
///
/// With `check`, the file is loaded and validated instead of written.
pub fn execute(output: Option<&str>, check: Option<&str>) -> CliResult<()> {
    if let Some(path) = check {
        let config = SimulationConfig::load(path)?;
        println!(
            "{} {} is valid ({} worker(s), {}x{} tiles)",
            "✓".bright_green(),
            path.bright_white(),
            config.worker_count(),
            config.tile_size,
            config.tile_size
        );
        return Ok(());
    }

    let config = SimulationConfig::default();
    match output {
        Some(path) => {
            config.save(Path::new(path))?;
            println!(
                "{} Wrote default configuration to {}",
                "✓".bright_green(),
                path.bright_white()
            );
        }
        None => print!("{}", config.to_toml_string()?),
    }
    Ok(())
}
