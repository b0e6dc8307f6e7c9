//! The machine state moved through the simulation driver.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::{AddressSetMaker, Clock, ConfigError, TransactionSource, TxRef, TxSet};

/// One execution unit running a single transaction. Ordered by completion
/// clock, with the transaction id breaking ties so heap order is total.
#[derive(Clone, Debug)]
pub struct Core {
    /// Clock value at which the transaction completes.
    pub clock: Clock,
    /// The transaction being executed.
    pub transaction: TxRef,
}

impl PartialEq for Core {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Core {}

impl PartialOrd for Core {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Core {
    fn cmp(&self, other: &Self) -> Ordering {
        self.clock
            .cmp(&other.clock)
            .then_with(|| self.transaction.id().cmp(&other.transaction.id()))
    }
}

/// Full state of the simulated machine at one point of one execution path.
///
/// A transaction lives in exactly one place at a time: not yet drawn from
/// `incoming`, waiting in `pending`, cleared in `scheduled`, or running on a
/// core. Cloning a state duplicates the set maker (and with it any renaming
/// table) and the source cursors, so branches of the state-space walk never
/// clobber each other; the transactions themselves are shared by reference.
#[derive(Clone, Debug)]
pub struct MachineState {
    /// Templates not yet materialized.
    pub incoming: TransactionSource,
    /// Allocator for the address sets of this run.
    pub set_maker: AddressSetMaker,
    /// Drawn but not yet scheduled, in draw order.
    pub pending: TxSet,
    /// Cleared for execution but not yet on a core, in scheduling order.
    pub scheduled: TxSet,
    /// Currently executing, ordered by completion clock.
    pub cores: BinaryHeap<Reverse<Core>>,
    /// Maximum number of simultaneously busy cores.
    pub core_count: usize,
    /// Global scheduler clock. Only ever increases along a path.
    pub clock: Clock,
}

impl MachineState {
    /// Initial state for one run.
    pub fn new(
        incoming: TransactionSource,
        set_maker: AddressSetMaker,
        core_count: usize,
    ) -> Result<Self, ConfigError> {
        if core_count == 0 {
            return Err(ConfigError::MustBePositive("core_count"));
        }
        Ok(Self {
            incoming,
            set_maker,
            pending: TxSet::default(),
            scheduled: TxSet::default(),
            cores: BinaryHeap::new(),
            core_count,
            clock: 0,
        })
    }

    /// Whether the run is over: the source is exhausted and nothing is
    /// pending, scheduled, or executing.
    pub fn is_terminal(&self) -> bool {
        self.incoming.is_exhausted()
            && self.pending.is_empty()
            && self.scheduled.is_empty()
            && self.cores.is_empty()
    }

    /// Completion clock of the earliest-finishing busy core.
    pub fn next_completion(&self) -> Option<Clock> {
        self.cores.peek().map(|Reverse(core)| core.clock)
    }

    /// Transactions currently on cores, in heap order (deterministic for a
    /// given history, not sorted).
    pub fn running(&self) -> impl Iterator<Item = &TxRef> {
        self.cores.iter().map(|Reverse(core)| &core.transaction)
    }

    /// Transactions still in flight anywhere, counting undrawn templates.
    pub fn in_flight(&self) -> usize {
        self.incoming.remaining() + self.pending.len() + self.scheduled.len() + self.cores.len()
    }

    /// Key for the driver's best-first walk: the next moment anything can
    /// happen in this state.
    pub fn priority_clock(&self) -> Clock {
        match self.next_completion() {
            Some(completion) => completion.min(self.clock),
            None => self.clock,
        }
    }
}
