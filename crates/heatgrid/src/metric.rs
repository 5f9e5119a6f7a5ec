//! Convergence metric: sum of squared differences between two field states.
//!
//! Differences are taken in `f32`, squared and accumulated in `f64`, so the sum is zero exactly
//! when the fields are identical. Row blocks are reduced in parallel; summation order depends on
//! the block split and results are only equal up to rounding across thread counts.

use rayon::prelude::*;

use heatgrid_core::error::{HeatGridError, Result};

use crate::storage::Field;

#[inline]
fn sq_diff(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = f64::from(y - x);
            d * d
        })
        .sum()
}

/// Sum over all points of `(next - current)²`, on the calling thread.
pub fn sum_sq_diff(current: &Field, next: &Field) -> Result<f64> {
    if current.size() != next.size() {
        return Err(HeatGridError::DimensionMismatch {
            expected: current.size(),
            actual: next.size(),
        });
    }
    Ok(sq_diff(current.as_slice(), next.as_slice()))
}

/// Parallel reduction over `tasks` row blocks. Sizes must already match.
pub(crate) fn sum_sq_diff_blocks(current: &Field, next: &Field, tasks: usize) -> f64 {
    let size = current.size();
    let rows_per_task = size.div_ceil(tasks.max(1));
    let block = rows_per_task * size;

    current
        .as_slice()
        .par_chunks(block)
        .zip(next.as_slice().par_chunks(block))
        .map(|(a, b)| sq_diff(a, b))
        .sum()
}
