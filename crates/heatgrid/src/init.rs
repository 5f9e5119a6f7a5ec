//! Initial field contents.

use heatgrid_core::config::InitialCondition;

use crate::storage::Field;

/// Fill `field` with `(ix + 1)(size - ix)(iy + 1)(size - iy)` on its local coordinates.
///
/// The profile vanishes one cell beyond every edge and peaks in the middle of the tile.
pub fn inidat(field: &mut Field) {
    let size = field.size();
    inidat_global(field, 0, 0, size);
}

/// Fill `field` with the same profile evaluated on a `global_size` domain, with the tile's
/// `(0, 0)` cell at global `(origin_row, origin_col)`.
pub fn inidat_global(field: &mut Field, origin_row: usize, origin_col: usize, global_size: usize) {
    let n = global_size as f64;
    for ix in 0..field.size() {
        let x = (origin_row + ix) as f64;
        let fx = (x + 1.0) * (n - x);
        for (iy, cell) in field.row_mut(ix).iter_mut().enumerate() {
            let y = (origin_col + iy) as f64;
            *cell = (fx * (y + 1.0) * (n - y)) as f32;
        }
    }
}

/// Apply `initial` to a tile at `origin` of a `global_size` domain.
pub fn apply(
    initial: InitialCondition,
    field: &mut Field,
    origin: (usize, usize),
    global_size: usize,
) {
    match initial {
        InitialCondition::Tile => inidat(field),
        InitialCondition::Global => inidat_global(field, origin.0, origin.1, global_size),
        InitialCondition::Uniform(value) => field.fill(value),
    }
}
