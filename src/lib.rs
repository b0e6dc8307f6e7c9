//! Cycle-level simulator for a hardware transactional-memory accelerator.
//!
//! The accelerator dispatches atomic transactions to a bank of execution
//! cores while guaranteeing that concurrently executing transactions never
//! write-conflict or read-write-conflict. Each transaction declares a read
//! set and a write set of memory addresses up front; the scheduler admits a
//! batch of mutually compatible transactions, the executor assigns them to
//! cores, and the driver advances a global clock over a priority queue of
//! machine states.
//!
//! The moving parts, leaves first:
//!
//! - [`AddressSet`] and [`AddressSetMaker`]: the address-set algebra with
//!   exact, Bloom-filter-approximate, and renaming-table-backed variants.
//! - [`Transaction`] and [`TransactionSet`]: transactions with their running
//!   read/write unions and the conflict test.
//! - [`TransactionSource`]: a lazy sequence of transaction templates that
//!   materializes transactions against the current set maker and defers the
//!   ones the renaming table cannot hold yet.
//! - [`GreedyScheduler`], [`MaximalScheduler`], [`TournamentScheduler`]:
//!   the strategies that pick the next conflict-free batch.
//! - [`RandomExecutor`] and [`OptimalExecutor`]: the policies that move
//!   scheduled transactions onto free cores.
//! - [`Simulator`]: the best-first discrete-event driver.
//!
//! Post-mortem measurements over a finished path live in [`stats`], and
//! [`sweep`] runs independent simulation configurations on a rayon pool.

use std::sync::Arc;

use indexmap::IndexSet;

/// A memory address drawn from the simulated object pool.
pub type Address = usize;

/// Process-wide transaction identity, used for equality and hashing.
pub type TxId = u64;

/// Simulated time, in cycles.
pub type Clock = u64;

/// Shared handle to an immutable transaction. Machine states along a
/// simulation path share transactions by reference; a transaction dies when
/// the last state referencing it is dropped.
pub type TxRef = Arc<Transaction>;

/// Insertion-ordered set of transactions. Iteration order is the order in
/// which transactions were drawn from the source, which is what keeps the
/// schedulers deterministic despite being defined over sets.
pub type TxSet = IndexSet<TxRef, ahash::RandomState>;

mod config;
mod executor;
mod machine;
mod scheduler;
mod sets;
mod simulator;
mod source;
pub mod stats;
pub mod sweep;
mod transaction;

pub use config::{ConfigError, SimConfig};
pub use executor::{OptimalExecutor, RandomExecutor, TransactionExecutor};
pub use machine::{Core, MachineState};
pub use scheduler::{
    GreedyScheduler, MaximalScheduler, SimError, TournamentScheduler, TransactionScheduler,
};
pub use sets::{AddressSet, AddressSetFactory, AddressSetMaker, CapacityExceeded, RenamingTable};
pub use simulator::Simulator;
pub use source::{DrawFailure, TransactionProfile, TransactionSource};
pub use transaction::{Transaction, TransactionSet};
