//! Global residual reduction across workers.
//!
//! Every worker contributes its local sum of squared differences for a round and blocks until
//! all participants have contributed; each then receives the same global sum. Contributions are
//! summed in worker order, so the result does not depend on arrival order.

use std::collections::HashMap;

use parking_lot::{Condvar, Mutex};
use tracing::{trace, warn};

use heatgrid_core::error::{HeatGridError, Result};
use heatgrid_core::k2k::WorkerId;

#[derive(Debug)]
struct Round {
    values: Vec<Option<f64>>,
    arrived: usize,
    departed: usize,
}

impl Round {
    fn new(participants: usize) -> Self {
        Self {
            values: vec![None; participants],
            arrived: 0,
            departed: 0,
        }
    }

    fn total(&self) -> f64 {
        self.values.iter().flatten().sum()
    }
}

#[derive(Debug, Default)]
struct ReducerState {
    rounds: HashMap<u64, Round>,
    aborted: bool,
}

/// Sum all-reduce over a fixed set of workers.
#[derive(Debug)]
pub struct ResidualReducer {
    participants: usize,
    state: Mutex<ReducerState>,
    ready: Condvar,
}

impl ResidualReducer {
    /// Create a reducer for workers `0..participants`.
    pub fn new(participants: usize) -> Self {
        Self {
            participants,
            state: Mutex::new(ReducerState::default()),
            ready: Condvar::new(),
        }
    }

    /// Number of workers taking part in every round.
    pub fn participants(&self) -> usize {
        self.participants
    }

    /// Contribute `value` to `round` and wait for the global sum.
    pub fn all_reduce(&self, round: u64, worker: WorkerId, value: f64) -> Result<f64> {
        if worker.0 >= self.participants {
            return Err(HeatGridError::worker(format!(
                "{} is not a participant of a {}-worker reduction",
                worker, self.participants
            )));
        }

        let mut state = self.state.lock();
        if state.aborted {
            return Err(Self::aborted(round));
        }

        let participants = self.participants;
        let entry = state
            .rounds
            .entry(round)
            .or_insert_with(|| Round::new(participants));
        if entry.values[worker.0].replace(value).is_some() {
            return Err(HeatGridError::worker(format!(
                "{} contributed twice to reduction round {}",
                worker, round
            )));
        }
        entry.arrived += 1;
        if entry.arrived == participants {
            trace!("Reduction round {} complete", round);
            self.ready.notify_all();
        }

        loop {
            if state.aborted {
                return Err(Self::aborted(round));
            }
            let complete = state
                .rounds
                .get(&round)
                .is_some_and(|r| r.arrived == participants);
            if complete {
                break;
            }
            self.ready.wait(&mut state);
        }

        let entry = state
            .rounds
            .get_mut(&round)
            .ok_or_else(|| HeatGridError::worker(format!("reduction round {} vanished", round)))?;
        let total = entry.total();
        entry.departed += 1;
        if entry.departed == participants {
            state.rounds.remove(&round);
        }
        Ok(total)
    }

    /// Fail every current and future `all_reduce` call.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        if !state.aborted {
            warn!(
                "Residual reduction aborted with {} round(s) open",
                state.rounds.len()
            );
            state.aborted = true;
        }
        self.ready.notify_all();
    }

    /// Whether [`abort`](Self::abort) was called.
    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    fn aborted(round: u64) -> HeatGridError {
        HeatGridError::worker(format!("residual reduction aborted in round {}", round))
    }
}
