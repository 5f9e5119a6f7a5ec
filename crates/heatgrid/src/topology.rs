//! Square decomposition of the domain into worker tiles.
//!
//! ```text
//! +---------+---------+
//! | rank 0  | rank 1  |
//! | (0, 0)  | (0, 1)  |
//! +---------+---------+
//! | rank 2  | rank 3  |
//! | (1, 0)  | (1, 1)  |
//! +---------+---------+
//! ```
//!
//! Ranks are row-major. `Up` is the tile with the lower row index.

use heatgrid_core::error::{HeatGridError, Result};
use heatgrid_core::halo::Direction;
use heatgrid_core::k2k::WorkerId;

/// `workers_per_side × workers_per_side` grid of tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    workers_per_side: usize,
}

impl Topology {
    /// Create a topology.
    pub fn new(workers_per_side: usize) -> Result<Self> {
        if workers_per_side == 0 {
            return Err(HeatGridError::config("workers_per_side must be at least 1"));
        }
        Ok(Self { workers_per_side })
    }

    /// Workers per side.
    pub fn workers_per_side(&self) -> usize {
        self.workers_per_side
    }

    /// Total number of workers.
    pub fn worker_count(&self) -> usize {
        self.workers_per_side * self.workers_per_side
    }

    /// All worker ids in rank order.
    pub fn workers(&self) -> impl Iterator<Item = WorkerId> {
        (0..self.worker_count()).map(WorkerId)
    }

    /// `(row, col)` of a worker's tile.
    pub fn coords(&self, worker: WorkerId) -> (usize, usize) {
        (worker.0 / self.workers_per_side, worker.0 % self.workers_per_side)
    }

    /// Worker at `(row, col)`.
    pub fn worker_at(&self, row: usize, col: usize) -> Option<WorkerId> {
        (row < self.workers_per_side && col < self.workers_per_side)
            .then(|| WorkerId(row * self.workers_per_side + col))
    }

    /// Neighbor of `worker` in `direction`, if the tile is not on that domain edge.
    pub fn neighbor(&self, worker: WorkerId, direction: Direction) -> Option<WorkerId> {
        let (row, col) = self.coords(worker);
        match direction {
            Direction::Up => row.checked_sub(1).and_then(|r| self.worker_at(r, col)),
            Direction::Down => self.worker_at(row + 1, col),
            Direction::Left => col.checked_sub(1).and_then(|c| self.worker_at(row, c)),
            Direction::Right => self.worker_at(row, col + 1),
        }
    }

    /// Neighbors in [`Direction::ALL`] order.
    pub fn neighbors(&self, worker: WorkerId) -> [Option<WorkerId>; 4] {
        Direction::ALL.map(|direction| self.neighbor(worker, direction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_worker_has_no_neighbors() {
        let topology = Topology::new(1).unwrap();
        assert_eq!(topology.neighbors(WorkerId(0)), [None; 4]);
    }

    #[test]
    fn test_three_by_three() {
        let topology = Topology::new(3).unwrap();
        assert_eq!(topology.worker_count(), 9);

        let center = WorkerId(4);
        assert_eq!(topology.coords(center), (1, 1));
        assert_eq!(topology.neighbor(center, Direction::Up), Some(WorkerId(1)));
        assert_eq!(topology.neighbor(center, Direction::Down), Some(WorkerId(7)));
        assert_eq!(topology.neighbor(center, Direction::Left), Some(WorkerId(3)));
        assert_eq!(topology.neighbor(center, Direction::Right), Some(WorkerId(5)));

        let corner = WorkerId(8);
        assert_eq!(topology.neighbor(corner, Direction::Down), None);
        assert_eq!(topology.neighbor(corner, Direction::Right), None);
        assert_eq!(topology.neighbor(corner, Direction::Up), Some(WorkerId(5)));
    }

    #[test]
    fn test_neighbor_relation_is_symmetric() {
        let topology = Topology::new(4).unwrap();
        for worker in topology.workers() {
            for direction in Direction::ALL {
                if let Some(other) = topology.neighbor(worker, direction) {
                    assert_eq!(topology.neighbor(other, direction.opposite()), Some(worker));
                }
            }
        }
    }

    #[test]
    fn test_zero_rejected() {
        assert!(Topology::new(0).is_err());
    }
}
