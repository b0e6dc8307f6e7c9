//! Post-mortem measurements over a finished simulation path.
//!
//! A path is the ordered sequence of machine states a successful run
//! produced. Everything here is read-only and works on the path slice the
//! driver returned; presentation (tables, plots) stays outside the crate.

use ahash::{AHashMap, AHashSet};

use crate::{Clock, MachineState, TxId};

/// The makespan: the clock of the terminal state.
pub fn final_clock(path: &[MachineState]) -> Clock {
    path.last().map_or(0, |state| state.clock)
}

/// Number of scheduled transactions at each distinct clock value, in path
/// order. The first state at a given clock wins, matching a sampling probe
/// on the scheduler's output register.
pub fn scheduled_counts(path: &[MachineState]) -> Vec<(Clock, usize)> {
    let mut counts: Vec<(Clock, usize)> = Vec::new();
    let mut seen = AHashSet::new();
    for state in path {
        if seen.insert(state.clock) {
            counts.push((state.clock, state.scheduled.len()));
        }
    }
    counts
}

/// Per-transaction latency: from the clock at which a transaction cleared
/// the pending pool (its first appearance in the scheduled queue or on a
/// core) to the clock at which it left the cores. Transactions still in
/// flight at the end of the path are skipped.
pub fn transaction_latencies(path: &[MachineState]) -> Vec<Clock> {
    let mut started: AHashMap<TxId, Clock> = AHashMap::new();
    let mut finished: AHashMap<TxId, Clock> = AHashMap::new();
    let mut prev_running: AHashSet<TxId> = AHashSet::new();

    for state in path {
        for transaction in state.scheduled.iter().chain(state.running()) {
            started.entry(transaction.id()).or_insert(state.clock);
        }

        let running: AHashSet<TxId> = state.running().map(|tr| tr.id()).collect();
        for id in prev_running.difference(&running) {
            finished.entry(*id).or_insert(state.clock);
        }
        prev_running = running;
    }

    let mut latencies: Vec<Clock> = started
        .iter()
        .filter_map(|(id, start)| finished.get(id).map(|end| end - start))
        .collect();
    latencies.sort_unstable();
    latencies
}

/// Time-weighted average of the number of busy cores, ignoring warm-up and
/// tail.
///
/// Warm-up lasts while every one of the `total` transactions is still in
/// flight (nothing has completed yet); the tail starts once the source is
/// dry and the pending pool has dropped below `pool_size`. When the
/// trimmed interval is empty the busy-core count of the last observed
/// state plus one is returned, as a ceiling estimate.
pub fn average_parallelism(
    path: &[MachineState],
    total: usize,
    pool_size: Option<usize>,
) -> f64 {
    let mut start: Option<Clock> = None;
    let mut prev_clock = 0;
    let mut end: Option<Clock> = None;
    let mut area: u128 = 0;
    let mut last_cores = 0;

    for state in path {
        last_cores = state.cores.len();
        // Warm-up: skip until the first transaction has completed.
        if state.in_flight() == total {
            continue;
        }
        match start {
            None => {
                start = Some(state.clock);
                prev_clock = state.clock;
            }
            Some(_) => {
                area += u128::from(state.clock - prev_clock) * state.cores.len() as u128;
                prev_clock = state.clock;
            }
        }
        // Tail: the pool can no longer be kept full.
        if state.incoming.remaining() == 0
            && pool_size.map_or(true, |pool| state.pending.len() < pool)
        {
            end = Some(state.clock);
            break;
        }
    }

    match (start, end) {
        (Some(start), Some(end)) if start != end => area as f64 / (end - start) as f64,
        _ => (last_cores + 1) as f64,
    }
}
