//! One tile of the decomposed domain.
//!
//! A [`TileWorker`] owns two fields, a stencil kernel and a halo endpoint. Each iteration it
//! posts its four edges to the neighbors, computes the interior while the data is in flight, then
//! waits for the incoming halos and finishes the edges. Sends of iteration `k` are only waited on
//! at the start of iteration `k + 1`, so the transport never blocks the interior pass.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use heatgrid_core::config::{BoundaryPolicy, SimulationConfig};
use heatgrid_core::error::Result;
use heatgrid_core::halo::{Direction, HaloSet};
use heatgrid_core::k2k::{HaloBroker, HaloEndpoint, SendRequest, WorkerId};
use heatgrid_core::request::{RequestSet, RequestStatus};

use crate::finalize::FinalizeHandle;
use crate::init;
use crate::kernel::StencilKernel;
use crate::output;
use crate::reducer::ResidualReducer;
use crate::storage::{Field, GridStorage};
use crate::topology::Topology;

/// Copy of the edge of `field` that faces `direction`.
pub fn extract_edge(field: &Field, direction: Direction) -> Vec<f32> {
    let size = field.size();
    match direction {
        Direction::Up => field.row(0).to_vec(),
        Direction::Down => field.row(size - 1).to_vec(),
        Direction::Left => field.column(0),
        Direction::Right => field.column(size - 1),
    }
}

/// State shared by every worker of a run.
#[derive(Clone)]
pub struct WorkerContext {
    /// Run configuration.
    pub config: Arc<SimulationConfig>,
    /// Tile layout.
    pub topology: Topology,
    /// Halo transport.
    pub broker: Arc<HaloBroker>,
    /// Convergence reduction.
    pub reducer: Arc<ResidualReducer>,
    /// Field allocator.
    pub storage: Arc<dyn GridStorage>,
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("topology", &self.topology)
            .field("broker", &self.broker)
            .finish()
    }
}

/// What a worker hands back once it is torn down.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    /// Worker rank.
    pub worker: WorkerId,
    /// `(row, col)` of the tile.
    pub coords: (usize, usize),
    /// Completed iterations.
    pub iterations: u64,
    /// Last global residual, if any check ran.
    pub residual: Option<f64>,
    /// Whether the run stopped on the convergence threshold.
    pub converged: bool,
    /// Final field, when the run collects fields.
    pub field: Option<Field>,
    /// Outcome of the last outstanding sends.
    pub send_status: RequestStatus,
}

/// One worker's tile, transport endpoint and iteration state.
pub struct TileWorker {
    id: WorkerId,
    coords: (usize, usize),
    neighbors: [Option<WorkerId>; 4],
    kernel: StencilKernel,
    endpoint: HaloEndpoint,
    current: Field,
    next: Field,
    halo: HaloSet,
    outstanding: RequestSet<SendRequest>,
    iteration: u64,
    context: WorkerContext,
}

impl std::fmt::Debug for TileWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileWorker")
            .field("id", &self.id)
            .field("coords", &self.coords)
            .field("iteration", &self.iteration)
            .field("outstanding", &self.outstanding.len())
            .finish()
    }
}

impl TileWorker {
    /// Allocate both fields and apply the initial condition.
    ///
    /// `endpoint` must already be registered with `context.broker`.
    pub fn new(endpoint: HaloEndpoint, context: WorkerContext) -> Result<Self> {
        let id = endpoint.worker();
        let config = &context.config;
        let size = config.tile_size;
        let coords = context.topology.coords(id);

        let kernel = StencilKernel::new(config.stencil, size)?;
        let mut current = context.storage.allocate(size)?;
        let next = match context.storage.allocate(size) {
            Ok(field) => field,
            Err(err) => {
                context.storage.release(current);
                return Err(err);
            }
        };

        let global_size = size * context.topology.workers_per_side();
        init::apply(
            config.initial,
            &mut current,
            (coords.0 * size, coords.1 * size),
            global_size,
        );

        Ok(Self {
            id,
            coords,
            neighbors: context.topology.neighbors(id),
            kernel,
            endpoint,
            current,
            next,
            halo: HaloSet::new(size),
            outstanding: RequestSet::new(),
            iteration: 0,
            context,
        })
    }

    /// Worker rank.
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Completed iterations.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// The field holding the latest completed iteration.
    pub fn current(&self) -> &Field {
        &self.current
    }

    fn neighbor(&self, direction: Direction) -> Option<WorkerId> {
        self.neighbors[direction.index()]
    }

    /// Compute iteration `self.iteration` into the back field.
    ///
    /// Does not swap; the caller decides whether to check convergence first.
    pub fn step(&mut self) -> Result<()> {
        let k = self.iteration;

        // Edge buffers sent last iteration must be consumed before new ones go out.
        self.outstanding.wait_all();

        for direction in Direction::ALL {
            if let Some(destination) = self.neighbor(direction) {
                let edge = extract_edge(&self.current, direction);
                let request =
                    self.endpoint
                        .post_send(destination, direction.opposite(), k, edge)?;
                self.outstanding.push(request);
            }
        }

        let incoming = Direction::ALL
            .into_iter()
            .filter(|d| self.neighbors[d.index()].is_some());
        let pending = self.endpoint.post_receives(k, incoming);

        self.kernel.update_interior(&self.current, &mut self.next)?;

        self.halo.begin(k);
        for direction in Direction::ALL {
            if self.neighbor(direction).is_some() {
                continue;
            }
            match self.context.config.boundary {
                BoundaryPolicy::Fixed(value) => self.halo.fill(direction, value),
                BoundaryPolicy::Mirror => self
                    .halo
                    .set_current(direction, extract_edge(&self.current, direction))?,
            }
        }

        pending.wait_into(&mut self.endpoint, &mut self.halo)?;
        self.kernel
            .update_boundary(&self.current, &mut self.next, &self.halo)
    }

    /// Make the back field current.
    fn advance(&mut self) {
        std::mem::swap(&mut self.current, &mut self.next);
        self.iteration += 1;
    }

    fn dump(&self, stem: &str) -> Result<()> {
        if let Some(dir) = &self.context.config.output_dir {
            let path: PathBuf = dir.join(format!("{}_{}.dat", stem, self.id.0));
            output::save_field(&path, &self.current)?;
            debug!("{}: wrote {}", self.id, path.display());
        }
        Ok(())
    }

    fn iterate(&mut self) -> Result<(Option<f64>, bool)> {
        let config = Arc::clone(&self.context.config);
        self.dump("initial")?;

        let mut residual = None;
        let mut converged = false;
        while self.iteration < config.max_iterations && !converged {
            self.step()?;
            let completed = self.iteration + 1;

            if completed % config.check_interval == 0 {
                let local = self.kernel.sum_sq_diff(&self.current, &self.next)?;
                let global = self
                    .context
                    .reducer
                    .all_reduce(completed, self.id, local)?;
                debug!(
                    "{}: iteration {}, local residual {:.6e}, global {:.6e}",
                    self.id, completed, local, global
                );
                residual = Some(global);
                converged = global < config.epsilon;
            }

            self.advance();
        }

        self.dump("final")?;
        Ok((residual, converged))
    }

    /// Iterate until convergence or the iteration limit, then tear down.
    ///
    /// On failure the broker is closed and the reduction aborted so no other worker stays
    /// blocked on this one.
    pub fn run(mut self) -> Result<WorkerReport> {
        let outcome = self.iterate();
        if let Err(err) = &outcome {
            warn!("{} failed at iteration {}: {}", self.id, self.iteration, err);
            self.context.broker.close();
            self.context.reducer.abort();
        }

        let TileWorker {
            id,
            coords,
            endpoint,
            current,
            next,
            outstanding,
            iteration,
            context,
            ..
        } = self;

        // Unconsumed inbound messages are dropped here, which cancels the peers' sends.
        drop(endpoint);
        context.storage.release(next);

        let field = context.config.collect_fields.then(|| current.clone());
        let send_status =
            FinalizeHandle::with_storage(current, outstanding, Arc::clone(&context.storage))
                .finalize();

        let (residual, converged) = outcome?;
        info!(
            "{} finished after {} iteration(s){}",
            id,
            iteration,
            if converged { " (converged)" } else { "" }
        );

        Ok(WorkerReport {
            worker: id,
            coords,
            iterations: iteration,
            residual,
            converged,
            field,
            send_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heatgrid_core::config::{InitialCondition, StencilConfig};
    use heatgrid_core::k2k::HaloBrokerBuilder;

    use crate::storage::HeapStorage;

    fn context(config: SimulationConfig) -> WorkerContext {
        let topology = Topology::new(config.workers_per_side).unwrap();
        WorkerContext {
            broker: HaloBrokerBuilder::new()
                .max_pending_messages(config.channel_capacity)
                .build(),
            reducer: Arc::new(ResidualReducer::new(topology.worker_count())),
            storage: Arc::new(HeapStorage),
            topology,
            config: Arc::new(config),
        }
    }

    #[test]
    fn test_extract_edge() {
        let field = Field::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(extract_edge(&field, Direction::Up), vec![1.0, 2.0]);
        assert_eq!(extract_edge(&field, Direction::Down), vec![3.0, 4.0]);
        assert_eq!(extract_edge(&field, Direction::Left), vec![1.0, 3.0]);
        assert_eq!(extract_edge(&field, Direction::Right), vec![2.0, 4.0]);
    }

    #[test]
    fn test_single_worker_fixed_boundary_matches_kernel() {
        let config = SimulationConfig::builder()
            .tile_size(5)
            .workers_per_side(1)
            .stencil(StencilConfig::new(0.1, 0.1).with_max_threads(1))
            .build()
            .unwrap();
        let ctx = context(config);
        let endpoint = ctx.broker.register(WorkerId(0));
        let mut worker = TileWorker::new(endpoint, ctx).unwrap();

        let mut expected = Field::zeroed(5).unwrap();
        let kernel = StencilKernel::new(StencilConfig::new(0.1, 0.1).with_max_threads(1), 5).unwrap();
        kernel
            .step(worker.current(), &mut expected, &HaloSet::uniform(5, 0.0))
            .unwrap();

        worker.step().unwrap();
        worker.advance();
        assert_eq!(worker.iteration(), 1);
        assert_eq!(worker.current(), &expected);
    }

    #[test]
    fn test_uniform_field_with_matching_boundary_stays_constant() {
        let config = SimulationConfig::builder()
            .tile_size(4)
            .workers_per_side(1)
            .max_iterations(3)
            .check_interval(1)
            .epsilon(0.0)
            .collect_fields(true)
            .initial(InitialCondition::Uniform(5.0))
            .boundary(BoundaryPolicy::Fixed(5.0))
            .stencil(StencilConfig::new(0.1, 0.1).with_max_threads(2))
            .build()
            .unwrap();
        let ctx = context(config);
        let endpoint = ctx.broker.register(WorkerId(0));
        let report = TileWorker::new(endpoint, ctx).unwrap().run().unwrap();

        assert_eq!(report.iterations, 3);
        assert_eq!(report.residual, Some(0.0));
        assert!(!report.converged);
        let field = report.field.unwrap();
        assert!(field.as_slice().iter().all(|&v| v == 5.0));
        assert_eq!(report.send_status, RequestStatus::Completed);
    }

    #[test]
    fn test_mirror_boundary_preserves_constant() {
        let config = SimulationConfig::builder()
            .tile_size(3)
            .workers_per_side(1)
            .max_iterations(2)
            .collect_fields(true)
            .initial(InitialCondition::Uniform(-2.0))
            .boundary(BoundaryPolicy::Mirror)
            .stencil(StencilConfig::new(0.2, 0.1).with_max_threads(1))
            .build()
            .unwrap();
        let ctx = context(config);
        let endpoint = ctx.broker.register(WorkerId(0));
        let report = TileWorker::new(endpoint, ctx).unwrap().run().unwrap();

        let field = report.field.unwrap();
        assert!(field.as_slice().iter().all(|&v| v == -2.0));
    }

    #[test]
    fn test_missing_neighbor_fails_and_closes_broker() {
        let config = SimulationConfig::builder()
            .tile_size(3)
            .workers_per_side(2)
            .max_iterations(1)
            .stencil(StencilConfig::new(0.1, 0.1).with_max_threads(1))
            .build()
            .unwrap();
        let ctx = context(config);
        let broker = Arc::clone(&ctx.broker);
        let reducer = Arc::clone(&ctx.reducer);
        // Neighbors 1 and 2 were never registered.
        let endpoint = broker.register(WorkerId(0));
        let err = TileWorker::new(endpoint, ctx).unwrap().run().unwrap_err();

        assert!(matches!(err, heatgrid_core::HeatGridError::Delivery { .. }));
        assert_eq!(broker.stats().registered_endpoints, 0);
        assert!(reducer.is_aborted());
    }
}
