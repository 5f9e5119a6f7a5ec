//! Error types for heatgrid.

use thiserror::Error;

use crate::halo::Direction;
use crate::k2k::{DeliveryStatus, WorkerId};

/// Result type for heatgrid operations.
pub type Result<T> = std::result::Result<T, HeatGridError>;

/// Errors that can occur while allocating, updating or exchanging a tile.
#[derive(Error, Debug)]
pub enum HeatGridError {
    /// Field buffer could not be allocated.
    #[error("Out of memory: failed to allocate {size} bytes for a field buffer")]
    OutOfMemory {
        /// Requested size in bytes (saturated on overflow).
        size: usize,
    },

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Two fields handed to the same pass differ in size.
    #[error("Field size mismatch: expected {expected}x{expected}, got {actual}x{actual}")]
    DimensionMismatch {
        /// Size of the current field.
        expected: usize,
        /// Size of the offending field.
        actual: usize,
    },

    /// The boundary pass ran without halo data for a direction.
    #[error("Missing halo data for {direction:?} (iteration {iteration})")]
    MissingHalo {
        /// Direction without data.
        direction: Direction,
        /// Iteration the halo set was prepared for.
        iteration: u64,
    },

    /// Halo data from a different iteration than the one being computed.
    #[error("Stale halo data for {direction:?}: expected iteration {expected}, got {actual}")]
    StaleHalo {
        /// Direction of the rejected data.
        direction: Direction,
        /// Iteration the receiver is waiting for.
        expected: u64,
        /// Iteration carried by the data.
        actual: u64,
    },

    /// Halo row length does not match the tile size.
    #[error("Halo length mismatch for {direction:?}: expected {expected}, got {actual}")]
    HaloLengthMismatch {
        /// Direction of the rejected data.
        direction: Direction,
        /// Tile size.
        expected: usize,
        /// Length supplied.
        actual: usize,
    },

    /// A halo message could not be delivered.
    #[error("Halo delivery {from} -> {to} failed: {status:?}")]
    Delivery {
        /// Sending worker.
        from: WorkerId,
        /// Destination worker.
        to: WorkerId,
        /// Delivery status reported by the broker.
        status: DeliveryStatus,
    },

    /// Transport-level failure (closed channel, worker gone).
    #[error("Transport error: {0}")]
    Transport(String),

    /// A worker thread failed outside of the error path.
    #[error("Worker error: {0}")]
    Worker(String),

    /// Configuration (de)serialization error.
    #[error("Config format error: {0}")]
    ConfigFormat(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HeatGridError {
    /// Create an invalid configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a worker error.
    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }

    /// Whether this error violates the halo contract between the transport and the kernel.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::MissingHalo { .. }
                | Self::StaleHalo { .. }
                | Self::HaloLengthMismatch { .. }
                | Self::DimensionMismatch { .. }
        )
    }
}

impl From<toml::de::Error> for HeatGridError {
    fn from(e: toml::de::Error) -> Self {
        HeatGridError::ConfigFormat(e.to_string())
    }
}

impl From<toml::ser::Error> for HeatGridError {
    fn from(e: toml::ser::Error) -> Self {
        HeatGridError::ConfigFormat(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_violation_classification() {
        let missing = HeatGridError::MissingHalo {
            direction: Direction::Up,
            iteration: 3,
        };
        assert!(missing.is_contract_violation());
        assert!(!HeatGridError::OutOfMemory { size: 64 }.is_contract_violation());
        assert!(!HeatGridError::transport("closed").is_contract_violation());
    }

    #[test]
    fn test_error_display() {
        let err = HeatGridError::StaleHalo {
            direction: Direction::Left,
            expected: 4,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "Stale halo data for Left: expected iteration 4, got 3"
        );
    }
}
