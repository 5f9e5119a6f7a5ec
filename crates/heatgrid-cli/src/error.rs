//! Error types for the heatgrid CLI.

use thiserror::Error;

use heatgrid::HeatGridError;

/// CLI result type alias.
pub type CliResult<T> = Result<T, CliError>;

/// CLI error type.
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration, file or simulation failure.
    #[error(transparent)]
    Simulation(#[from] HeatGridError),
}
