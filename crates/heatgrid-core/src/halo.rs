//! Halo (ghost) data received from neighboring tiles.
//!
//! ```text
//!            UP[0..size]
//!          +-------------+
//! LEFT[r]  |    tile     |  RIGHT[r]
//!          +-------------+
//!           DOWN[0..size]
//! ```
//!
//! `UP`/`DOWN` are indexed by column, `LEFT`/`RIGHT` by row. A `HaloSet` is opened for one
//! iteration at a time; data tagged with any other iteration is rejected, so the boundary pass can
//! never consume values left over from a previous step.

use serde::{Deserialize, Serialize};

use crate::error::{HeatGridError, Result};

/// Cardinal direction of a neighbor, seen from the tile that stores the halo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    /// Row above row 0.
    Up,
    /// Row below row `size - 1`.
    Down,
    /// Column left of column 0.
    Left,
    /// Column right of column `size - 1`.
    Right,
}

impl Direction {
    /// All directions, in slot order.
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// Get the opposite direction.
    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    /// Slot index in a four-entry array.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// One received halo row or column.
#[derive(Debug, Clone, PartialEq)]
struct HaloSlot {
    iteration: u64,
    values: Vec<f32>,
}

/// The four halo sequences a tile's boundary pass reads.
#[derive(Debug, Clone)]
pub struct HaloSet {
    size: usize,
    iteration: u64,
    slots: [Option<HaloSlot>; 4],
}

impl HaloSet {
    /// Create an empty halo set for tiles of `size × size`, opened for iteration 0.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            iteration: 0,
            slots: Default::default(),
        }
    }

    /// Create a halo set for iteration 0 with every direction set to `value`.
    pub fn uniform(size: usize, value: f32) -> Self {
        let mut halo = Self::new(size);
        for direction in Direction::ALL {
            halo.slots[direction.index()] = Some(HaloSlot {
                iteration: 0,
                values: vec![value; size],
            });
        }
        halo
    }

    /// Tile size the halo rows must match.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Iteration this set currently accepts.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Open the set for `iteration`, discarding everything held so far.
    pub fn begin(&mut self, iteration: u64) {
        self.iteration = iteration;
        self.slots = Default::default();
    }

    /// Store data for `direction`, tagged with the iteration it belongs to.
    pub fn set(&mut self, direction: Direction, iteration: u64, values: Vec<f32>) -> Result<()> {
        if iteration != self.iteration {
            return Err(HeatGridError::StaleHalo {
                direction,
                expected: self.iteration,
                actual: iteration,
            });
        }
        if values.len() != self.size {
            return Err(HeatGridError::HaloLengthMismatch {
                direction,
                expected: self.size,
                actual: values.len(),
            });
        }
        self.slots[direction.index()] = Some(HaloSlot { iteration, values });
        Ok(())
    }

    /// Store data for the currently open iteration.
    pub fn set_current(&mut self, direction: Direction, values: Vec<f32>) -> Result<()> {
        self.set(direction, self.iteration, values)
    }

    /// Fill `direction` with a constant.
    pub fn fill(&mut self, direction: Direction, value: f32) {
        self.slots[direction.index()] = Some(HaloSlot {
            iteration: self.iteration,
            values: vec![value; self.size],
        });
    }

    /// Whether `direction` holds data for the open iteration.
    pub fn has(&self, direction: Direction) -> bool {
        self.slots[direction.index()]
            .as_ref()
            .is_some_and(|slot| slot.iteration == self.iteration)
    }

    /// Halo values for `direction`, if present for the open iteration.
    pub fn get(&self, direction: Direction) -> Option<&[f32]> {
        self.slots[direction.index()]
            .as_ref()
            .filter(|slot| slot.iteration == self.iteration)
            .map(|slot| slot.values.as_slice())
    }

    /// Halo values for `direction`, or a contract error if they are absent.
    pub fn require(&self, direction: Direction) -> Result<&[f32]> {
        self.get(direction).ok_or(HeatGridError::MissingHalo {
            direction,
            iteration: self.iteration,
        })
    }

    /// Directions still missing for the open iteration.
    pub fn missing(&self) -> Vec<Direction> {
        Direction::ALL
            .into_iter()
            .filter(|d| !self.has(*d))
            .collect()
    }

    /// Borrow all four directions at once, failing on the first missing one.
    pub fn complete(&self) -> Result<[&[f32]; 4]> {
        Ok([
            self.require(Direction::Up)?,
            self.require(Direction::Down)?,
            self.require(Direction::Left)?,
            self.require(Direction::Right)?,
        ])
    }
}
