//! # heatgrid
//!
//! Explicit five-point heat diffusion on a square domain split into square tiles, one worker per
//! tile. Each iteration a worker posts its edges to its neighbors, updates the interior of its
//! tile while the halos are in flight, and finishes the edges once they arrive.
//!
//! ## Quick start
//!
//! ```no_run
//! use heatgrid::prelude::*;
//!
//! let config = SimulationConfig::builder()
//!     .tile_size(128)
//!     .workers_per_side(2)
//!     .max_iterations(500)
//!     .build()?;
//!
//! let report = Simulation::new(config)?.run()?;
//! println!("{} iterations, converged: {}", report.iterations, report.converged);
//! # Ok::<(), heatgrid::HeatGridError>(())
//! ```
//!
//! ## Building blocks
//!
//! - [`StencilKernel`] - interior and boundary passes, residual metric
//! - [`Field`] / [`GridStorage`] - tile buffers and their allocator
//! - [`FinalizeHandle`] - wait on outstanding sends before a buffer is released
//! - [`TileWorker`] - one tile's iteration loop
//! - [`Simulation`] - spawns the workers and gathers a [`SimulationReport`]

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod finalize;
pub mod init;
pub mod kernel;
pub mod metric;
pub mod output;
pub mod reducer;
pub mod simulation;
pub mod storage;
pub mod topology;
pub mod worker;

/// Prelude module for convenient imports
pub mod prelude {
    pub use heatgrid_core::prelude::*;

    pub use crate::finalize::FinalizeHandle;
    pub use crate::init::{inidat, inidat_global};
    pub use crate::kernel::StencilKernel;
    pub use crate::metric::sum_sq_diff;
    pub use crate::output::{render_field, save_field, write_field};
    pub use crate::reducer::ResidualReducer;
    pub use crate::simulation::{RunSummary, Simulation, SimulationReport};
    pub use crate::storage::{Field, GridStorage, HeapStorage};
    pub use crate::topology::Topology;
    pub use crate::worker::{TileWorker, WorkerContext, WorkerReport};
}

pub use heatgrid_core::{
    BoundaryPolicy, Direction, HaloSet, HeatGridError, InitialCondition, Result, SimulationConfig,
    StencilConfig,
};

pub use finalize::FinalizeHandle;
pub use kernel::StencilKernel;
pub use simulation::{Simulation, SimulationReport};
pub use storage::{Field, GridStorage, HeapStorage};
pub use worker::{TileWorker, WorkerReport};
