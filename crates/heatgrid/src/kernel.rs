//! Five-point heat stencil.
//!
//! One explicit step is
//!
//! ```text
//! next[i][j] = c + cx * (S + N - 2c) + cy * (E + W - 2c)
//! ```
//!
//! where `c = current[i][j]`, `S/N = current[i±1][j]` and `E/W = current[i][j±1]`. The step is
//! split in two passes so it can overlap the halo exchange:
//!
//! - [`StencilKernel::update_interior`] touches `[1, size-2]²` and reads only local data.
//! - [`StencilKernel::update_boundary`] touches the four edges. Any stencil neighbor that falls
//!   outside the tile is read from the [`HaloSet`]: row `-1` from `UP[col]`, row `size` from
//!   `DOWN[col]`, column `-1` from `LEFT[row]`, column `size` from `RIGHT[row]`.
//!
//! Every point, interior or edge, evaluates the same expression with the same operand order, so a
//! corner gets a bit-identical value from either of its two edges.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use heatgrid_core::config::StencilConfig;
use heatgrid_core::error::{HeatGridError, Result};
use heatgrid_core::halo::{Direction, HaloSet};

use crate::metric;
use crate::storage::Field;

/// Update one point.
///
/// Neighbor pairs are summed in `f32`, everything else is carried in `f64` and narrowed once.
#[inline(always)]
fn five_point(cx: f32, cy: f32, c: f32, south: f32, north: f32, east: f32, west: f32) -> f32 {
    let c = f64::from(c);
    let vertical = f64::from(south + north) - 2.0 * c;
    let horizontal = f64::from(east + west) - 2.0 * c;
    (c + f64::from(cx) * vertical + f64::from(cy) * horizontal) as f32
}

/// Local field plus the four halos, addressed with out-of-range coordinates.
struct Neighborhood<'a> {
    field: &'a Field,
    up: &'a [f32],
    down: &'a [f32],
    left: &'a [f32],
    right: &'a [f32],
}

impl Neighborhood<'_> {
    #[inline]
    fn at(&self, row: isize, col: isize) -> f32 {
        let n = self.field.size() as isize;
        if row < 0 {
            self.up[col as usize]
        } else if row >= n {
            self.down[col as usize]
        } else if col < 0 {
            self.left[row as usize]
        } else if col >= n {
            self.right[row as usize]
        } else {
            self.field.value_at(row as usize, col as usize)
        }
    }

    #[inline]
    fn update(&self, cx: f32, cy: f32, i: usize, j: usize) -> f32 {
        let (r, c) = (i as isize, j as isize);
        five_point(
            cx,
            cy,
            self.field.value_at(i, j),
            self.at(r + 1, c),
            self.at(r - 1, c),
            self.at(r, c + 1),
            self.at(r, c - 1),
        )
    }

    /// New values along the edge facing `edge`, in row/column order.
    fn edge(&self, edge: Direction, cx: f32, cy: f32) -> Vec<f32> {
        let n = self.field.size();
        (0..n)
            .map(|k| {
                let (i, j) = match edge {
                    Direction::Up => (0, k),
                    Direction::Down => (n - 1, k),
                    Direction::Left => (k, 0),
                    Direction::Right => (k, n - 1),
                };
                self.update(cx, cy, i, j)
            })
            .collect()
    }
}

/// Stencil operator bound to one run's coefficients and a worker-local thread pool.
pub struct StencilKernel {
    config: StencilConfig,
    pool: ThreadPool,
}

impl std::fmt::Debug for StencilKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StencilKernel")
            .field("config", &self.config)
            .field("pool_threads", &self.pool.current_num_threads())
            .finish()
    }
}

impl StencilKernel {
    /// Create a kernel for `size × size` tiles.
    ///
    /// The pool gets `config.thread_count(size)` threads: never more than the tile has rows.
    pub fn new(config: StencilConfig, size: usize) -> Result<Self> {
        config.validate()?;
        let threads = config.thread_count(size);

        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("heatgrid-stencil-{}", i))
            .build()
            .map_err(|e| HeatGridError::config(format!("failed to build thread pool: {}", e)))?;

        debug!(
            "StencilKernel: cx = {}, cy = {}, {} thread(s) for {}x{} tiles",
            config.cx, config.cy, threads, size, size
        );

        Ok(Self { config, pool })
    }

    /// Coefficients and thread bound.
    pub fn config(&self) -> &StencilConfig {
        &self.config
    }

    /// Threads in this kernel's pool.
    pub fn pool_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn check_sizes(current: &Field, next: &Field) -> Result<usize> {
        if current.size() != next.size() {
            return Err(HeatGridError::DimensionMismatch {
                expected: current.size(),
                actual: next.size(),
            });
        }
        Ok(current.size())
    }

    /// Update every interior point of `next` from `current`.
    ///
    /// Reads nothing but `current`; fields of size 2 or less have no interior and are left as is.
    pub fn update_interior(&self, current: &Field, next: &mut Field) -> Result<()> {
        let size = Self::check_sizes(current, next)?;
        if size < 3 {
            return Ok(());
        }

        let interior_rows = size - 2;
        let rows_per_task = interior_rows.div_ceil(self.config.thread_count(interior_rows));
        let (cx, cy) = (self.config.cx, self.config.cy);
        let src = current.as_slice();

        // Rows 1..size-1, split into disjoint row blocks.
        let interior = &mut next.as_mut_slice()[size..(size - 1) * size];

        self.pool.install(|| {
            interior
                .par_chunks_mut(rows_per_task * size)
                .enumerate()
                .for_each(|(block, rows)| {
                    let first_row = 1 + block * rows_per_task;
                    for (offset, out) in rows.chunks_exact_mut(size).enumerate() {
                        let i = first_row + offset;
                        let north = &src[(i - 1) * size..i * size];
                        let row = &src[i * size..(i + 1) * size];
                        let south = &src[(i + 1) * size..(i + 2) * size];

                        for j in 1..size - 1 {
                            out[j] =
                                five_point(cx, cy, row[j], south[j], north[j], row[j + 1], row[j - 1]);
                        }
                    }
                });
        });

        Ok(())
    }

    /// Update the four edges of `next` from `current` and the halo.
    ///
    /// The halo must hold data for every direction, for the iteration being computed, with
    /// `size` values each; anything else is returned as a contract error.
    pub fn update_boundary(&self, current: &Field, next: &mut Field, halo: &HaloSet) -> Result<()> {
        let size = Self::check_sizes(current, next)?;
        if halo.size() != size {
            return Err(HeatGridError::DimensionMismatch {
                expected: size,
                actual: halo.size(),
            });
        }
        let [up, down, left, right] = halo.complete()?;

        let neighborhood = Neighborhood {
            field: current,
            up,
            down,
            left,
            right,
        };
        let (cx, cy) = (self.config.cx, self.config.cy);

        let edges: Vec<(Direction, Vec<f32>)> = self.pool.install(|| {
            Direction::ALL
                .par_iter()
                .map(|&edge| (edge, neighborhood.edge(edge, cx, cy)))
                .collect()
        });

        // Corners are written twice with identical values.
        for (edge, values) in edges {
            match edge {
                Direction::Up => next.row_mut(0).copy_from_slice(&values),
                Direction::Down => next.row_mut(size - 1).copy_from_slice(&values),
                Direction::Left => next.set_column(0, &values),
                Direction::Right => next.set_column(size - 1, &values),
            }
        }

        Ok(())
    }

    /// Interior then boundary pass.
    pub fn step(&self, current: &Field, next: &mut Field, halo: &HaloSet) -> Result<()> {
        self.update_interior(current, next)?;
        self.update_boundary(current, next, halo)
    }

    /// Sum of squared differences between `current` and `next`, computed on this kernel's pool.
    pub fn sum_sq_diff(&self, current: &Field, next: &Field) -> Result<f64> {
        let size = Self::check_sizes(current, next)?;
        let tasks = self.config.thread_count(size);
        Ok(self
            .pool
            .install(|| metric::sum_sq_diff_blocks(current, next, tasks)))
    }
}
