//! Scheduling strategies: pick the next conflict-free batch.
//!
//! All strategies share one outer pipeline (`run`): gate on a full
//! execution queue, refill the pending pool from the source, and apply the
//! batches the strategy hook returns. The strategies differ only in how
//! they search `pending` for a batch compatible with the ongoing work.

use thiserror::Error;
use tracing::{trace, warn};

use crate::{Clock, ConfigError, DrawFailure, MachineState, TransactionSet, TxSet};

/// Fatal simulation failures.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SimError {
    /// Deferred transactions can never be admitted: the pool is empty and
    /// no cores are draining, so no table slot will ever free up. Retry
    /// with a larger renaming table or more hash functions.
    #[error("renaming table too small: deferred transactions are blocked and no cores are draining")]
    RenamingTableTooSmall,
}

/// The scheduling unit of the accelerator.
///
/// `run` maps a machine state to its successor states; strategies implement
/// [`schedule`](Self::schedule) and inherit the surrounding pipeline.
pub trait TransactionScheduler {
    /// Maximum `|pending|`; `None` means the pool is unbounded.
    fn pool_size(&self) -> Option<usize>;

    /// Maximum `|scheduled|`; `None` means the queue is unbounded.
    fn queue_size(&self) -> Option<usize>;

    /// Pick zero or more batches from `pending`, each jointly compatible
    /// with `ongoing`, returning the elapsed scheduling time alongside
    /// each. `max_new` bounds the batch size where the strategy can honour
    /// a bound.
    fn schedule(
        &self,
        ongoing: &TransactionSet,
        pending: &TxSet,
        max_new: Option<usize>,
    ) -> Vec<(TransactionSet, Clock)>;

    /// Try scheduling a batch of new transactions, producing one successor
    /// state per batch the strategy returned.
    fn run(&self, state: &MachineState) -> Result<Vec<MachineState>, SimError> {
        let mut state = state.clone();

        // A full execution queue leaves nothing to decide; wait for a core.
        if let Some(queue_size) = self.queue_size() {
            if state.scheduled.len() >= queue_size {
                if let Some(completion) = state.next_completion() {
                    state.clock = state.clock.max(completion);
                }
                return Ok(vec![state]);
            }
        }

        // Refill the pending pool. Deferrals do not consume pool slots:
        // the loop keeps trying until enough templates materialize or the
        // source has nothing more to offer this round.
        loop {
            if let Some(pool_size) = self.pool_size() {
                if state.pending.len() >= pool_size {
                    break;
                }
            }
            match state.incoming.try_next(&mut state.set_maker) {
                Ok(transaction) => {
                    state.pending.insert(transaction);
                }
                Err(DrawFailure::Deferred) => continue,
                Err(DrawFailure::Exhausted) => break,
            }
        }

        if state.pending.is_empty() {
            return match state.next_completion() {
                Some(completion) => {
                    // Nothing to schedule until a core frees its slots.
                    state.clock = state.clock.max(completion);
                    Ok(vec![state])
                }
                None => {
                    debug_assert!(state.incoming.has_blocked());
                    warn!("renaming table cannot admit any blocked transaction");
                    Err(SimError::RenamingTableTooSmall)
                }
            };
        }

        let mut ongoing = TransactionSet::new();
        for transaction in state.running() {
            ongoing.add(transaction.clone());
        }
        for transaction in &state.scheduled {
            ongoing.add(transaction.clone());
        }
        let max_new = self.queue_size().map(|q| q - state.scheduled.len());

        let batches = self.schedule(&ongoing, &state.pending, max_new);
        debug_assert!(!batches.is_empty());
        let next_completion = state.next_completion();

        let mut successors = Vec::with_capacity(batches.len());
        for (batch, elapsed) in batches {
            let mut successor = state.clone();
            successor.clock += elapsed;
            if batch.is_empty() {
                // Everything pending conflicts with the ongoing work; the
                // next chance to make progress is the next completion.
                if let Some(completion) = next_completion {
                    successor.clock = successor.clock.max(completion);
                }
            }
            for transaction in batch.iter() {
                successor.pending.shift_remove(transaction);
                successor.scheduled.insert(transaction.clone());
            }
            trace!(
                batch = batch.len(),
                clock = successor.clock,
                "scheduled a batch"
            );
            successors.push(successor);
        }
        Ok(successors)
    }
}

/// Single-pass scheduler: walk `pending` in draw order and admit every
/// transaction compatible with the ongoing work and the batch so far.
#[derive(Clone, Debug)]
pub struct GreedyScheduler {
    op_time: Clock,
    pool_size: Option<usize>,
    queue_size: Option<usize>,
}

impl GreedyScheduler {
    /// Create a greedy scheduler taking `op_time` cycles per invocation.
    pub fn new(
        op_time: Clock,
        pool_size: Option<usize>,
        queue_size: Option<usize>,
    ) -> Result<Self, ConfigError> {
        check_limits(pool_size, queue_size)?;
        Ok(Self {
            op_time,
            pool_size,
            queue_size,
        })
    }
}

impl TransactionScheduler for GreedyScheduler {
    fn pool_size(&self) -> Option<usize> {
        self.pool_size
    }

    fn queue_size(&self) -> Option<usize> {
        self.queue_size
    }

    fn schedule(
        &self,
        ongoing: &TransactionSet,
        pending: &TxSet,
        max_new: Option<usize>,
    ) -> Vec<(TransactionSet, Clock)> {
        let mut batch = TransactionSet::new();
        for transaction in pending {
            if max_new.is_some_and(|limit| batch.len() >= limit) {
                break;
            }
            if ongoing.compatible(transaction) && batch.compatible(transaction) {
                batch.add(transaction.clone());
            }
        }
        vec![(batch, self.op_time)]
    }
}

/// Exhaustive scheduler: enumerate every jointly-compatible subset of the
/// pool and keep the largest. Exponential in the pool size; meant as an
/// oracle to compare the practical schedulers against.
#[derive(Clone, Debug)]
pub struct MaximalScheduler {
    op_time: Clock,
    pool_size: Option<usize>,
    queue_size: Option<usize>,
    n_schedules: usize,
    branching: bool,
}

impl MaximalScheduler {
    /// Create a maximal scheduler keeping the `n_schedules` largest
    /// batches. With `branching` the driver receives one successor per
    /// kept batch and explores them all; without it only the largest
    /// survives.
    pub fn new(
        op_time: Clock,
        pool_size: Option<usize>,
        queue_size: Option<usize>,
        n_schedules: usize,
        branching: bool,
    ) -> Result<Self, ConfigError> {
        check_limits(pool_size, queue_size)?;
        if n_schedules == 0 {
            return Err(ConfigError::MustBePositive("n_schedules"));
        }
        Ok(Self {
            op_time,
            pool_size,
            queue_size,
            n_schedules,
            branching,
        })
    }
}

impl TransactionScheduler for MaximalScheduler {
    fn pool_size(&self) -> Option<usize> {
        self.pool_size
    }

    fn queue_size(&self) -> Option<usize> {
        self.queue_size
    }

    fn schedule(
        &self,
        ongoing: &TransactionSet,
        pending: &TxSet,
        max_new: Option<usize>,
    ) -> Vec<(TransactionSet, Clock)> {
        let pending: Vec<_> = pending.iter().collect();
        let mut candidates = Vec::new();
        let mut prefix = TransactionSet::new();
        collect_candidates(ongoing, &pending, 0, &mut prefix, max_new, &mut candidates);

        // Stable by generation order, so ties resolve the same way on
        // every run.
        candidates.sort_by_key(|set| std::cmp::Reverse(set.len()));
        let keep = if self.branching { self.n_schedules } else { 1 };
        candidates.truncate(keep);
        candidates
            .into_iter()
            .map(|batch| (batch, self.op_time))
            .collect()
    }
}

fn collect_candidates(
    ongoing: &TransactionSet,
    pending: &[&crate::TxRef],
    index: usize,
    prefix: &mut TransactionSet,
    max_new: Option<usize>,
    out: &mut Vec<TransactionSet>,
) {
    if index == pending.len() {
        out.push(prefix.clone());
        return;
    }
    collect_candidates(ongoing, pending, index + 1, prefix, max_new, out);
    let transaction = pending[index];
    if max_new.is_some_and(|limit| prefix.len() >= limit) {
        return;
    }
    if ongoing.compatible(transaction) && prefix.compatible(transaction) {
        let mut extended = prefix.clone();
        extended.add(transaction.clone());
        collect_candidates(ongoing, pending, index + 1, &mut extended, max_new, out);
    }
}

/// Tournament scheduler: the hardware-shaped merge tree.
///
/// Every pool entry compatible with the ongoing work starts as a singleton
/// set; each round pairs adjacent sets and merges a pair when the merge
/// stays conflict-free, otherwise the first of the pair survives and the
/// second is discarded. Rounds halve the field until one set remains.
#[derive(Clone, Debug)]
pub struct TournamentScheduler {
    op_time: Clock,
    pool_size: Option<usize>,
    queue_size: Option<usize>,
    is_pipelined: bool,
}

impl TournamentScheduler {
    /// Create a tournament scheduler with `op_time` cycles per merge
    /// round. A pipelined tournament overlaps rounds and always charges a
    /// single `op_time`.
    pub fn new(
        op_time: Clock,
        pool_size: Option<usize>,
        queue_size: Option<usize>,
        is_pipelined: bool,
    ) -> Result<Self, ConfigError> {
        check_limits(pool_size, queue_size)?;
        Ok(Self {
            op_time,
            pool_size,
            queue_size,
            is_pipelined,
        })
    }
}

impl TransactionScheduler for TournamentScheduler {
    fn pool_size(&self) -> Option<usize> {
        self.pool_size
    }

    fn queue_size(&self) -> Option<usize> {
        self.queue_size
    }

    fn schedule(
        &self,
        ongoing: &TransactionSet,
        pending: &TxSet,
        _max_new: Option<usize>,
    ) -> Vec<(TransactionSet, Clock)> {
        // The merge tree cannot bound its output size mid-merge, so
        // `max_new` is ignored; the queue-full gate above is the only
        // limit, as in the hardware.
        let mut sets: Vec<TransactionSet> = pending
            .iter()
            .filter(|transaction| ongoing.compatible(transaction))
            .map(|transaction| TransactionSet::new_with([transaction.clone()]))
            .collect();

        let mut rounds: Clock = 0;
        while sets.len() > 1 {
            let mut survivors = Vec::with_capacity(sets.len().div_ceil(2));
            let mut pairs = sets.into_iter();
            while let Some(first) = pairs.next() {
                match pairs.next() {
                    Some(second) if first.compatible_with(&second) => {
                        survivors.push(first.union_with(&second));
                    }
                    // An incompatible second loses the round entirely.
                    _ => survivors.push(first),
                }
            }
            sets = survivors;
            rounds += 1;
        }

        let batch = sets.pop().unwrap_or_default();
        let elapsed = if self.is_pipelined {
            self.op_time
        } else {
            self.op_time * rounds.max(1)
        };
        vec![(batch, elapsed)]
    }
}

fn check_limits(pool_size: Option<usize>, queue_size: Option<usize>) -> Result<(), ConfigError> {
    if pool_size == Some(0) {
        return Err(ConfigError::MustBePositive("pool_size"));
    }
    if queue_size == Some(0) {
        return Err(ConfigError::MustBePositive("queue_size"));
    }
    Ok(())
}
