//! Run configuration.
//!
//! Everything here is fixed for the lifetime of a run and handed to the kernel and workers at
//! construction time. `SimulationConfig` round-trips through TOML so runs can be described in a
//! file and overridden from the command line.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HeatGridError, Result};

/// Default diffusion weight along both axes.
pub const DEFAULT_COEFFICIENT: f32 = 0.1;

fn default_max_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Stencil coefficients and the intra-worker thread bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StencilConfig {
    /// Weight of the second difference along rows (`i` index).
    pub cx: f32,
    /// Weight of the second difference along columns (`j` index).
    pub cy: f32,
    /// Upper bound on compute tasks per pass.
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
}

impl Default for StencilConfig {
    fn default() -> Self {
        Self {
            cx: DEFAULT_COEFFICIENT,
            cy: DEFAULT_COEFFICIENT,
            max_threads: default_max_threads(),
        }
    }
}

impl StencilConfig {
    /// Create a configuration with explicit coefficients and the default thread bound.
    pub fn new(cx: f32, cy: f32) -> Self {
        Self {
            cx,
            cy,
            ..Self::default()
        }
    }

    /// Set the thread bound.
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Number of tasks to split a pass over `rows` independent rows into.
    ///
    /// Never more tasks than rows, never fewer than one.
    pub fn thread_count(&self, rows: usize) -> usize {
        rows.min(self.max_threads).max(1)
    }

    /// Check the coefficients and thread bound.
    pub fn validate(&self) -> Result<()> {
        if !self.cx.is_finite() || !self.cy.is_finite() {
            return Err(HeatGridError::config(format!(
                "coefficients must be finite (cx = {}, cy = {})",
                self.cx, self.cy
            )));
        }
        if self.max_threads == 0 {
            return Err(HeatGridError::config("max_threads must be at least 1"));
        }
        Ok(())
    }
}

/// Halo values used on a physical domain edge, where no neighbor exists.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// Constant value beyond the edge.
    Fixed(f32),
    /// The tile's own edge values reflected outward.
    Mirror,
}

impl Default for BoundaryPolicy {
    fn default() -> Self {
        BoundaryPolicy::Fixed(0.0)
    }
}

/// How each worker fills its tile before the first iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum InitialCondition {
    /// Separable parabolic profile on the tile's local coordinates.
    #[default]
    Tile,
    /// The same profile on global coordinates, so the tiles form one smooth domain.
    Global,
    /// Every cell set to one value.
    Uniform(f32),
}

/// Full description of a run: decomposition, iteration control and stencil.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Cells per tile side.
    pub tile_size: usize,
    /// Workers per domain side; the domain has `workers_per_side²` tiles.
    pub workers_per_side: usize,
    /// Hard iteration limit.
    pub max_iterations: u64,
    /// Iterations between global convergence checks.
    pub check_interval: u64,
    /// Stop once the global sum of squared differences drops below this.
    pub epsilon: f64,
    /// Capacity of each worker's halo inbox.
    pub channel_capacity: usize,
    /// Keep a copy of every worker's final field in the report.
    pub collect_fields: bool,
    /// Directory for initial/final field dumps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// Initial field contents.
    pub initial: InitialCondition,
    /// Physical edge fallback.
    pub boundary: BoundaryPolicy,
    /// Stencil coefficients.
    pub stencil: StencilConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tile_size: 64,
            workers_per_side: 2,
            max_iterations: 1000,
            check_interval: 20,
            epsilon: 1e-3,
            channel_capacity: 16,
            collect_fields: false,
            output_dir: None,
            initial: InitialCondition::default(),
            boundary: BoundaryPolicy::default(),
            stencil: StencilConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> SimulationConfigBuilder {
        SimulationConfigBuilder::new()
    }

    /// Total number of workers.
    pub fn worker_count(&self) -> usize {
        self.workers_per_side * self.workers_per_side
    }

    /// Check every field.
    pub fn validate(&self) -> Result<()> {
        self.stencil.validate()?;
        if self.tile_size == 0 {
            return Err(HeatGridError::config("tile_size must be at least 1"));
        }
        if self.workers_per_side == 0 {
            return Err(HeatGridError::config("workers_per_side must be at least 1"));
        }
        if self.check_interval == 0 {
            return Err(HeatGridError::config("check_interval must be at least 1"));
        }
        if !(self.epsilon.is_finite() && self.epsilon >= 0.0) {
            return Err(HeatGridError::config(format!(
                "epsilon must be finite and non-negative, got {}",
                self.epsilon
            )));
        }
        // Each neighbor can be at most one iteration ahead: 4 directions x 2 iterations.
        if self.channel_capacity < 8 {
            return Err(HeatGridError::config(format!(
                "channel_capacity must be at least 8, got {}",
                self.channel_capacity
            )));
        }
        if let InitialCondition::Uniform(v) = self.initial {
            if !v.is_finite() {
                return Err(HeatGridError::config("uniform initial value must be finite"));
            }
        }
        if let BoundaryPolicy::Fixed(v) = self.boundary {
            if !v.is_finite() {
                return Err(HeatGridError::config("fixed boundary value must be finite"));
            }
        }
        Ok(())
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write as TOML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}

/// Builder for [`SimulationConfig`].
#[derive(Debug, Clone, Default)]
pub struct SimulationConfigBuilder {
    config: SimulationConfig,
}

impl SimulationConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set cells per tile side.
    pub fn tile_size(mut self, size: usize) -> Self {
        self.config.tile_size = size;
        self
    }

    /// Set workers per domain side.
    pub fn workers_per_side(mut self, count: usize) -> Self {
        self.config.workers_per_side = count;
        self
    }

    /// Set the iteration limit.
    pub fn max_iterations(mut self, iterations: u64) -> Self {
        self.config.max_iterations = iterations;
        self
    }

    /// Set the convergence check interval.
    pub fn check_interval(mut self, interval: u64) -> Self {
        self.config.check_interval = interval;
        self
    }

    /// Set the convergence threshold.
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.config.epsilon = epsilon;
        self
    }

    /// Set the halo inbox capacity.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Keep final fields in the report.
    pub fn collect_fields(mut self, collect: bool) -> Self {
        self.config.collect_fields = collect;
        self
    }

    /// Dump initial and final fields into a directory.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    /// Set the initial condition.
    pub fn initial(mut self, initial: InitialCondition) -> Self {
        self.config.initial = initial;
        self
    }

    /// Set the physical edge fallback.
    pub fn boundary(mut self, policy: BoundaryPolicy) -> Self {
        self.config.boundary = policy;
        self
    }

    /// Set the stencil configuration.
    pub fn stencil(mut self, stencil: StencilConfig) -> Self {
        self.config.stencil = stencil;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<SimulationConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
