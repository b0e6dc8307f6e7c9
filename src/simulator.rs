//! The discrete-event driver: a best-first walk over machine states.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use tracing::trace;

use crate::{Clock, MachineState, SimError, TransactionExecutor, TransactionScheduler};

// A queue entry carries the whole path so a finished walk can hand back
// every intermediate state for post-mortem statistics. Ordering is by
// priority clock with the insertion index breaking ties FIFO, which makes
// the walk deterministic even when successors share a clock.
#[derive(Debug)]
struct Node {
    priority: Clock,
    seq: u64,
    path: Vec<MachineState>,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Simulates executing a stream of transactions on the accelerator.
///
/// The driver pops the minimum-clock state from its queue and applies
/// exactly one transition: dispatch scheduled transactions to free cores,
/// retire the earliest finished core, or invoke the scheduler. Executors
/// and schedulers may return several successors, at which point the walk
/// branches and the earliest-finishing branch wins the race to a terminal
/// state.
#[derive(Clone, Debug)]
pub struct Simulator<S, E> {
    scheduler: S,
    executor: E,
    schedule_before_completion: bool,
}

impl<S: TransactionScheduler, E: TransactionExecutor> Simulator<S, E> {
    /// Create a driver over the given strategy pair. Finished cores are
    /// retired before the scheduler runs, matching the hardware's retire
    /// port; see [`schedule_before_completion`] for the other order.
    ///
    /// [`schedule_before_completion`]: Self::schedule_before_completion
    pub fn new(scheduler: S, executor: E) -> Self {
        Self {
            scheduler,
            executor,
            schedule_before_completion: false,
        }
    }

    /// When a completion is due and the execution queue has room, run the
    /// scheduler against the still-running transaction set first and
    /// retire the core within the same step.
    pub fn schedule_before_completion(mut self, yes: bool) -> Self {
        self.schedule_before_completion = yes;
        self
    }

    /// Run the simulation to its terminal state and return the path that
    /// reached it first. The final entry's clock is the makespan.
    pub fn run(&self, initial: MachineState) -> Result<Vec<MachineState>, SimError> {
        let mut queue = BinaryHeap::new();
        let mut seq: u64 = 0;
        queue.push(Reverse(Node {
            priority: initial.priority_clock(),
            seq,
            path: vec![initial],
        }));

        while let Some(Reverse(node)) = queue.pop() {
            let state = node.path.last().expect("paths are never empty");
            if state.is_terminal() {
                trace!(clock = state.clock, steps = node.path.len(), "terminal");
                return Ok(node.path);
            }

            let successors = self.step(state)?;
            debug_assert!(!successors.is_empty(), "every step must make progress");

            let mut path = node.path;
            let reuse = successors.len() == 1;
            for successor in successors {
                seq += 1;
                let mut successor_path = if reuse {
                    std::mem::take(&mut path)
                } else {
                    path.clone()
                };
                successor_path.push(successor);
                queue.push(Reverse(Node {
                    priority: successor_path
                        .last()
                        .expect("just pushed")
                        .priority_clock(),
                    seq,
                    path: successor_path,
                }));
            }
        }

        unreachable!("state queue drained without reaching a terminal state")
    }

    fn step(&self, state: &MachineState) -> Result<Vec<MachineState>, SimError> {
        // A free core and a cleared transaction: dispatch.
        if state.cores.len() < state.core_count && !state.scheduled.is_empty() {
            trace!(clock = state.clock, "dispatching");
            return Ok(self.executor.run(state));
        }

        let completion_due = state
            .next_completion()
            .is_some_and(|completion| completion <= state.clock);
        if completion_due {
            if self.schedule_before_completion && self.queue_has_room(state) {
                // Schedule against the still-running set, then retire the
                // earliest core in the same step.
                let scheduled = self.scheduler.run(state)?;
                return Ok(scheduled.into_iter().map(complete_earliest).collect());
            }
            trace!(clock = state.clock, "retiring earliest core");
            return Ok(vec![complete_earliest(state.clone())]);
        }

        self.scheduler.run(state)
    }

    fn queue_has_room(&self, state: &MachineState) -> bool {
        self.scheduler
            .queue_size()
            .map_or(true, |queue_size| state.scheduled.len() < queue_size)
    }
}

// Retire the earliest-finishing core: advance the clock to its completion,
// release the transaction's renaming-table slots, and re-arm any templates
// that were parked on a capacity failure.
fn complete_earliest(mut state: MachineState) -> MachineState {
    let Reverse(core) = state
        .cores
        .pop()
        .expect("completion steps require a busy core");
    state.clock = state.clock.max(core.clock);
    state.set_maker.free(&core.transaction);
    state.incoming.reset_overflows();
    trace!(
        id = core.transaction.id(),
        clock = state.clock,
        "transaction completed"
    );
    state
}
