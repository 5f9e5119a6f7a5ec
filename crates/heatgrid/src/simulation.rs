//! Run driver: one thread per tile worker.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info};

use heatgrid_core::config::SimulationConfig;
use heatgrid_core::error::{HeatGridError, Result};
use heatgrid_core::k2k::{BrokerStats, HaloBroker, HaloBrokerBuilder, WorkerId};

use crate::reducer::ResidualReducer;
use crate::storage::{Field, GridStorage, HeapStorage};
use crate::topology::Topology;
use crate::worker::{TileWorker, WorkerContext, WorkerReport};

/// A configured run.
pub struct Simulation {
    config: Arc<SimulationConfig>,
    topology: Topology,
    storage: Arc<dyn GridStorage>,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("config", &self.config)
            .field("topology", &self.topology)
            .finish()
    }
}

impl Simulation {
    /// Validate `config` and prepare a run on heap storage.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        Self::with_storage(config, Arc::new(HeapStorage))
    }

    /// Validate `config` and prepare a run allocating fields from `storage`.
    pub fn with_storage(config: SimulationConfig, storage: Arc<dyn GridStorage>) -> Result<Self> {
        config.validate()?;
        let topology = Topology::new(config.workers_per_side)?;
        Ok(Self {
            config: Arc::new(config),
            topology,
            storage,
        })
    }

    /// The run configuration.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// The tile layout.
    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Run every worker to completion.
    pub fn run(&self) -> Result<SimulationReport> {
        let config = &self.config;
        let broker = HaloBrokerBuilder::new()
            .max_pending_messages(config.channel_capacity)
            .build();
        let reducer = Arc::new(ResidualReducer::new(self.topology.worker_count()));

        if let Some(dir) = &config.output_dir {
            std::fs::create_dir_all(dir)?;
        }

        info!(
            "Starting run: {} worker(s) of {}x{} cells, max {} iteration(s), check every {}",
            self.topology.worker_count(),
            config.tile_size,
            config.tile_size,
            config.max_iterations,
            config.check_interval
        );

        // Every endpoint exists before any worker sends.
        let endpoints: Vec<_> = self
            .topology
            .workers()
            .map(|worker| broker.register(worker))
            .collect();

        let context = WorkerContext {
            config: Arc::clone(&self.config),
            topology: self.topology,
            broker: Arc::clone(&broker),
            reducer: Arc::clone(&reducer),
            storage: Arc::clone(&self.storage),
        };

        let started = Instant::now();
        let results: Vec<(WorkerId, Result<WorkerReport>, bool)> = std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(endpoints.len());
            for endpoint in endpoints {
                let worker = endpoint.worker();
                let context = context.clone();
                let spawned = std::thread::Builder::new()
                    .name(format!("heatgrid-{}", worker))
                    .spawn_scoped(scope, move || {
                        let shutdown = ShutdownGuard {
                            broker: Arc::clone(&context.broker),
                            reducer: Arc::clone(&context.reducer),
                        };
                        let result = TileWorker::new(endpoint, context).and_then(TileWorker::run);
                        if result.is_err() {
                            shutdown.trigger();
                        }
                        result
                    });
                match spawned {
                    Ok(handle) => handles.push((worker, Ok(handle))),
                    Err(err) => {
                        broker.close();
                        reducer.abort();
                        handles.push((worker, Err(HeatGridError::from(err))));
                    }
                }
            }

            handles
                .into_iter()
                .map(|(worker, handle)| match handle.map(|h| h.join()) {
                    Ok(Ok(result)) => (worker, result, false),
                    Ok(Err(_)) => (
                        worker,
                        Err(HeatGridError::worker(format!("{} panicked", worker))),
                        true,
                    ),
                    Err(err) => (worker, Err(err), false),
                })
                .collect()
        });
        let elapsed = started.elapsed();

        let mut workers = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (worker, result, panicked) in results {
            match result {
                Ok(report) => workers.push(report),
                Err(err) => {
                    error!("{} failed: {}", worker, err);
                    // A panic explains the transport errors its peers saw.
                    if panicked {
                        failures.insert(0, err);
                    } else {
                        failures.push(err);
                    }
                }
            }
        }
        if let Some(err) = root_cause(failures) {
            return Err(err);
        }

        let first = workers
            .first()
            .ok_or_else(|| HeatGridError::worker("run finished without any worker"))?;
        let report = SimulationReport {
            iterations: first.iterations,
            residual: first.residual,
            converged: first.converged,
            elapsed,
            stats: broker.stats(),
            tile_size: config.tile_size,
            workers_per_side: self.topology.workers_per_side(),
            workers,
        };

        info!(
            "Run finished: {} iteration(s) in {:.3}s, residual {}, {}",
            report.iterations,
            elapsed.as_secs_f64(),
            report
                .residual
                .map_or_else(|| "n/a".to_string(), |r| format!("{:.6e}", r)),
            if report.converged {
                "converged"
            } else {
                "iteration limit reached"
            }
        );

        Ok(report)
    }
}

/// Closes the transport and aborts the reduction when a worker thread unwinds.
///
/// Peers blocked on a halo or a global check would otherwise wait for a worker that is gone, and
/// the driver, joining in rank order, would never reach the panicked thread.
struct ShutdownGuard {
    broker: Arc<HaloBroker>,
    reducer: Arc<ResidualReducer>,
}

impl ShutdownGuard {
    fn trigger(&self) {
        self.broker.close();
        self.reducer.abort();
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!("worker thread panicked, shutting down the run");
            self.trigger();
        }
    }
}

/// Pick the error that caused the run to fail.
///
/// Once one worker fails the broker is closed and the reduction aborted, so the other workers
/// report transport or worker errors that are only echoes of the first.
fn root_cause(failures: Vec<HeatGridError>) -> Option<HeatGridError> {
    let is_echo = |err: &HeatGridError| {
        matches!(
            err,
            HeatGridError::Transport(_) | HeatGridError::Worker(_) | HeatGridError::Delivery { .. }
        )
    };
    let mut echoes = Vec::new();
    for err in failures {
        if !is_echo(&err) {
            return Some(err);
        }
        echoes.push(err);
    }
    echoes.into_iter().next()
}

/// Outcome of a complete run.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Iterations every worker completed.
    pub iterations: u64,
    /// Last global residual, if a check ran.
    pub residual: Option<f64>,
    /// Whether the residual dropped below the threshold.
    pub converged: bool,
    /// Wall-clock time of the iteration phase.
    pub elapsed: Duration,
    /// Halo transport counters.
    pub stats: BrokerStats,
    /// Cells per tile side.
    pub tile_size: usize,
    /// Workers per domain side.
    pub workers_per_side: usize,
    /// Per-worker reports in rank order.
    pub workers: Vec<WorkerReport>,
}

impl SimulationReport {
    /// Stitch the collected tiles into one field covering the whole domain.
    ///
    /// `None` unless the run collected fields.
    pub fn assemble(&self) -> Option<Field> {
        let tile = self.tile_size;
        let mut global = Field::zeroed(tile * self.workers_per_side).ok()?;
        for report in &self.workers {
            let field = report.field.as_ref()?;
            let (row0, col0) = (report.coords.0 * tile, report.coords.1 * tile);
            for (i, row) in field.rows().enumerate() {
                global.row_mut(row0 + i)[col0..col0 + tile].copy_from_slice(row);
            }
        }
        Some(global)
    }

    /// Serializable summary.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            iterations: self.iterations,
            residual: self.residual,
            converged: self.converged,
            elapsed_secs: self.elapsed.as_secs_f64(),
            workers: self.workers.len(),
            tile_size: self.tile_size,
            messages_delivered: self.stats.messages_delivered,
            messages_failed: self.stats.messages_failed,
        }
    }
}

/// Run outcome as written to `summary.toml`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Completed iterations.
    pub iterations: u64,
    /// Last global residual.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub residual: Option<f64>,
    /// Whether the run converged.
    pub converged: bool,
    /// Wall-clock seconds.
    pub elapsed_secs: f64,
    /// Number of workers.
    pub workers: usize,
    /// Cells per tile side.
    pub tile_size: usize,
    /// Halo messages delivered.
    pub messages_delivered: u64,
    /// Halo messages rejected.
    pub messages_failed: u64,
}

impl RunSummary {
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
