//! Execution policies: move scheduled transactions onto free cores.

use std::cmp::Reverse;

use itertools::Itertools;
use tracing::trace;

use crate::{Core, MachineState, TxRef};

/// The policy deciding which scheduled transactions start executing.
///
/// Callers only invoke `run` when at least one transaction is scheduled
/// and at least one core is free.
pub trait TransactionExecutor {
    /// Assign transactions to cores, producing every successor state this
    /// policy wants explored.
    fn run(&self, state: &MachineState) -> Vec<MachineState>;
}

/// Start scheduled transactions in scheduling order until the cores are
/// full or the queue is drained. One successor; the "arbitrary" pick is
/// pinned to insertion order so runs are reproducible.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomExecutor;

impl TransactionExecutor for RandomExecutor {
    fn run(&self, state: &MachineState) -> Vec<MachineState> {
        debug_assert!(!state.scheduled.is_empty() && state.cores.len() < state.core_count);
        let mut successor = state.clone();
        while successor.cores.len() < successor.core_count && !successor.scheduled.is_empty() {
            let transaction = successor
                .scheduled
                .shift_remove_index(0)
                .expect("scheduled set is non-empty");
            dispatch(&mut successor, transaction);
        }
        vec![successor]
    }
}

/// Explore every way of filling the free cores: one successor per choice
/// of which scheduled transactions start simultaneously. Combined with the
/// best-first driver this searches for the executor decisions that
/// minimize the final clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct OptimalExecutor;

impl TransactionExecutor for OptimalExecutor {
    fn run(&self, state: &MachineState) -> Vec<MachineState> {
        debug_assert!(!state.scheduled.is_empty() && state.cores.len() < state.core_count);
        let free = state.core_count - state.cores.len();

        // Everything fits: there is only one choice.
        if state.scheduled.len() <= free {
            let mut successor = state.clone();
            while let Some(transaction) = successor.scheduled.shift_remove_index(0) {
                dispatch(&mut successor, transaction);
            }
            return vec![successor];
        }

        (0..state.scheduled.len())
            .combinations(free)
            .map(|choice| {
                let mut successor = state.clone();
                // Collect first: removing by index would shift the others.
                let picked: Vec<TxRef> = choice
                    .into_iter()
                    .map(|index| successor.scheduled[index].clone())
                    .collect();
                for transaction in picked {
                    successor.scheduled.shift_remove(&transaction);
                    dispatch(&mut successor, transaction);
                }
                successor
            })
            .collect()
    }
}

fn dispatch(state: &mut MachineState, transaction: TxRef) {
    let completion = state.clock + transaction.time();
    trace!(
        id = transaction.id(),
        completion,
        "dispatching transaction to a core"
    );
    state.cores.push(Reverse(Core {
        clock: completion,
        transaction,
    }));
}
