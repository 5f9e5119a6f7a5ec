//! # heatgrid core
//!
//! Shared types for the tiled heat-stencil workers:
//!
//! - [`HeatGridError`] - error type and [`Result`] alias
//! - [`StencilConfig`] / [`SimulationConfig`] - run configuration
//! - [`HaloSet`] / [`Direction`] - neighbor data consumed by the boundary pass
//! - [`HaloBroker`] - in-process worker-to-worker halo transport
//! - [`CommRequest`] - outstanding asynchronous requests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod halo;
pub mod k2k;
pub mod request;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{
        BoundaryPolicy, InitialCondition, SimulationConfig, SimulationConfigBuilder, StencilConfig,
    };
    pub use crate::error::{HeatGridError, Result};
    pub use crate::halo::{Direction, HaloSet};
    pub use crate::k2k::{
        BrokerConfig, BrokerStats, DeliveryStatus, HaloBroker, HaloBrokerBuilder, HaloEndpoint,
        HaloMessage, PendingHalos, SendRequest, WorkerId,
    };
    pub use crate::request::{CommRequest, CompletedRequest, RequestSet, RequestStatus};
}

pub use config::{BoundaryPolicy, InitialCondition, SimulationConfig, StencilConfig};
pub use error::{HeatGridError, Result};
pub use halo::{Direction, HaloSet};
pub use k2k::{HaloBroker, HaloBrokerBuilder, HaloEndpoint, WorkerId};
pub use request::{CommRequest, RequestSet, RequestStatus};
