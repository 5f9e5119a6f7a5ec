//! Integration tests for multi-worker runs.
//!
//! A decomposed run exchanges halos through the broker; with the global initial condition and a
//! zero boundary it must produce exactly the field a single worker computes on the whole domain.

use heatgrid::prelude::*;

fn config(tile_size: usize, workers_per_side: usize, iterations: u64) -> SimulationConfigBuilder {
    SimulationConfig::builder()
        .tile_size(tile_size)
        .workers_per_side(workers_per_side)
        .max_iterations(iterations)
        .check_interval(1_000_000)
        .collect_fields(true)
        .initial(InitialCondition::Global)
        .boundary(BoundaryPolicy::Fixed(0.0))
        .stencil(StencilConfig::new(0.1, 0.1).with_max_threads(2))
}

fn run(builder: SimulationConfigBuilder) -> SimulationReport {
    let config = builder.build().expect("Invalid config");
    Simulation::new(config)
        .expect("Failed to create simulation")
        .run()
        .expect("Run failed")
}

fn assembled(builder: SimulationConfigBuilder) -> Field {
    run(builder).assemble().expect("Fields were not collected")
}

/// 2x2 workers on 6x6 tiles match one worker on a 12x12 tile.
#[test]
fn test_two_by_two_matches_single_worker() {
    let whole = assembled(config(12, 1, 25));
    let split = assembled(config(6, 2, 25));
    assert_eq!(split, whole);
}

/// 3x3 workers on 2x2 tiles match one worker on a 6x6 tile.
#[test]
fn test_three_by_three_small_tiles() {
    let whole = assembled(config(6, 1, 15));
    let split = assembled(config(2, 3, 15));
    assert_eq!(split, whole);
}

/// Single-cell tiles take every neighbor from halos.
#[test]
fn test_single_cell_tiles() {
    let whole = assembled(config(4, 1, 8));
    let split = assembled(config(1, 4, 8));
    assert_eq!(split, whole);
}

/// Asymmetric coefficients keep the decomposition exact.
#[test]
fn test_asymmetric_coefficients() {
    let stencil = StencilConfig::new(0.22, 0.03).with_max_threads(3);
    let whole = assembled(config(10, 1, 12).stencil(stencil));
    let split = assembled(config(5, 2, 12).stencil(stencil));
    assert_eq!(split, whole);
}

/// The run stops at the first check whose global residual is below the threshold.
#[test]
fn test_stops_on_convergence() {
    let report = run(config(4, 2, 100).check_interval(3).epsilon(1.0e30));

    assert!(report.converged);
    assert_eq!(report.iterations, 3);
    for worker in &report.workers {
        assert_eq!(worker.iterations, 3);
        assert!(worker.converged);
        assert_eq!(worker.residual, report.residual);
        assert_eq!(worker.send_status, RequestStatus::Completed);
    }
}

/// Diffusion towards a zero boundary only ever lowers the residual of later checks.
#[test]
fn test_residual_shrinks() {
    let early = run(config(4, 2, 10).check_interval(10).epsilon(0.0));
    let late = run(config(4, 2, 200).check_interval(200).epsilon(0.0));

    let early = early.residual.expect("no check ran");
    let late = late.residual.expect("no check ran");
    assert!(late < early, "{} !< {}", late, early);
}

/// Without a check, the iteration limit ends the run.
#[test]
fn test_iteration_limit() {
    let report = run(config(3, 2, 7));
    assert!(!report.converged);
    assert_eq!(report.iterations, 7);
    assert!(report.residual.is_none());
}

/// A uniform field with a mirrored boundary never changes.
#[test]
fn test_mirror_boundary_uniform() {
    let field = assembled(
        config(3, 2, 20)
            .initial(InitialCondition::Uniform(4.5))
            .boundary(BoundaryPolicy::Mirror),
    );
    assert!(field.as_slice().iter().all(|&v| v == 4.5));
}

/// Each worker dumps its initial and final tile when an output directory is set.
#[test]
fn test_output_files() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let report = run(config(3, 2, 4)
        .initial(InitialCondition::Tile)
        .output_dir(dir.path()));

    let mut tile = Field::zeroed(3).expect("Failed to allocate");
    inidat(&mut tile);
    let initial = render_field(&tile).expect("render");

    for worker in &report.workers {
        let rank = worker.worker.0;
        let written = std::fs::read_to_string(dir.path().join(format!("initial_{}.dat", rank)))
            .expect("initial dump missing");
        assert_eq!(written, initial);

        let final_text = std::fs::read_to_string(dir.path().join(format!("final_{}.dat", rank)))
            .expect("final dump missing");
        let field = worker.field.as_ref().expect("field not collected");
        assert_eq!(final_text, render_field(field).expect("render"));
    }
}

/// Without collected fields there is nothing to assemble.
#[test]
fn test_assemble_requires_fields() {
    let report = run(config(3, 2, 2).collect_fields(false));
    assert!(report.assemble().is_none());
    assert!(report.workers.iter().all(|w| w.field.is_none()));
}
