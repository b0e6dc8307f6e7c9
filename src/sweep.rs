//! Run independent simulation configurations on a worker pool.
//!
//! A single simulation is strictly single-threaded; what parallelizes is a
//! sweep over configurations (scheduler parameters, core counts, operation
//! times) or over repeats of one configuration. Each job owns its state in
//! full and only results cross threads.

use rayon::prelude::*;

use crate::{
    Clock, MachineState, SimError, Simulator, TransactionExecutor, TransactionScheduler,
};

/// One self-contained simulation: a strategy pair plus the initial state.
#[derive(Debug)]
pub struct SimJob<S, E> {
    /// The driver to run.
    pub simulator: Simulator<S, E>,
    /// The initial machine state, owning its source and set maker.
    pub state: MachineState,
}

/// Run every job on the rayon pool, returning paths in job order.
pub fn run_all<S, E>(jobs: Vec<SimJob<S, E>>) -> Vec<Result<Vec<MachineState>, SimError>>
where
    S: TransactionScheduler + Send + Sync,
    E: TransactionExecutor + Send + Sync,
{
    jobs.into_par_iter()
        .map(|job| job.simulator.run(job.state))
        .collect()
}

/// Run every job and keep only the makespans, failing on the first fatal
/// simulation error.
pub fn final_clocks<S, E>(jobs: Vec<SimJob<S, E>>) -> Result<Vec<Clock>, SimError>
where
    S: TransactionScheduler + Send + Sync,
    E: TransactionExecutor + Send + Sync,
{
    run_all(jobs)
        .into_iter()
        .map(|result| result.map(|path| crate::stats::final_clock(&path)))
        .collect()
}
