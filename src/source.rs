//! The lazy sequence of transaction templates feeding a simulation.
//!
//! A source holds the per-transaction template entries and the flat address
//! array an external generator produced for them; addresses are consumed
//! sequentially, reads first. Materializing a transaction acquires its
//! address sets from the run's maker and can fail when the renaming table
//! is saturated, in which case the entry is parked until completions free
//! slots.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::{Address, AddressSetMaker, Clock, ConfigError, Transaction, TxRef};

fn one() -> u64 {
    1
}

/// One entry of a transaction template file: how many addresses the
/// transaction reads and writes, how long it runs, and its relative weight
/// in the generated mix. Unknown keys in the file are ignored.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct TransactionProfile {
    /// Size of the read set.
    pub reads: usize,
    /// Size of the write set.
    pub writes: usize,
    /// Execution cost in cycles.
    pub time: Clock,
    /// Relative frequency among the generated transactions.
    #[serde(default = "one")]
    pub weight: u64,
}

/// Why the source produced no transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawFailure {
    /// The renaming table had no room; the entry was parked for a later
    /// retry and any partial insertions were rolled back.
    Deferred,
    /// No fresh templates and nothing eligible for retry right now.
    Exhausted,
}

/// Lazy transaction source with capacity-failure deferral.
///
/// Cloning a source is cheap — the template and address arrays are shared —
/// and captures the cursors, so a cloned machine state resumes the sequence
/// exactly where the original stood.
#[derive(Clone, Debug)]
pub struct TransactionSource {
    templates: Arc<[(Arc<str>, TransactionProfile)]>,
    addresses: Arc<[Address]>,
    template_idx: usize,
    address_idx: usize,
    // Entries that overflowed the renaming table, as (template index,
    // address base). They stay parked until `reset_overflows` re-arms them.
    overflowed: VecDeque<(usize, usize)>,
    deferred: VecDeque<(usize, usize)>,
}

impl TransactionSource {
    /// Build a source from labelled templates and the flat address array
    /// generated for them.
    pub fn new(
        templates: Vec<(String, TransactionProfile)>,
        addresses: Vec<Address>,
    ) -> Result<Self, ConfigError> {
        let required: usize = templates
            .iter()
            .map(|(_, profile)| profile.reads + profile.writes)
            .sum();
        if required > addresses.len() {
            return Err(ConfigError::NotEnoughAddresses {
                required,
                available: addresses.len(),
            });
        }
        Ok(Self {
            templates: templates
                .into_iter()
                .map(|(label, profile)| (Arc::from(label.as_str()), profile))
                .collect(),
            addresses: addresses.into(),
            template_idx: 0,
            address_idx: 0,
            overflowed: VecDeque::new(),
            deferred: VecDeque::new(),
        })
    }

    /// Materialize the next transaction against `maker`.
    ///
    /// Re-armed deferrals go first, then fresh templates. A capacity
    /// failure rolls back whatever the entry already inserted, parks it,
    /// and reports [`DrawFailure::Deferred`]; the entry is not retried
    /// again until [`reset_overflows`](Self::reset_overflows).
    pub fn try_next(&mut self, maker: &mut AddressSetMaker) -> Result<TxRef, DrawFailure> {
        let (template_idx, base) = if let Some(entry) = self.deferred.pop_front() {
            entry
        } else if self.template_idx < self.templates.len() {
            let entry = (self.template_idx, self.address_idx);
            let (_, profile) = &self.templates[self.template_idx];
            self.template_idx += 1;
            self.address_idx += profile.reads + profile.writes;
            entry
        } else {
            return Err(DrawFailure::Exhausted);
        };

        let (label, profile) = &self.templates[template_idx];
        let reads = &self.addresses[base..base + profile.reads];
        let writes = &self.addresses[base + profile.reads..base + profile.reads + profile.writes];

        let read_set = match maker.make(reads) {
            Ok(set) => set,
            Err(_) => {
                debug!(template = %label, "read set overflowed the renaming table; deferring");
                self.overflowed.push_back((template_idx, base));
                return Err(DrawFailure::Deferred);
            }
        };
        let write_set = match maker.make(writes) {
            Ok(set) => set,
            Err(_) => {
                // The read set is already in the table; take it back out
                // before parking the entry.
                maker.free_addresses(reads);
                debug!(template = %label, "write set overflowed the renaming table; deferring");
                self.overflowed.push_back((template_idx, base));
                return Err(DrawFailure::Deferred);
            }
        };

        let rename_steps = maker
            .history()
            .map(|history| {
                let inserted = reads.len() + writes.len();
                history[history.len() - inserted..]
                    .iter()
                    .map(|&probes| u64::from(probes))
                    .sum()
            })
            .unwrap_or(0);

        Ok(Arc::new(Transaction::with_metadata(
            read_set,
            write_set,
            profile.time,
            Some(label.clone()),
            rename_steps,
        )))
    }

    /// Make every overflowed entry eligible for retry. Called after table
    /// slots have been released.
    pub fn reset_overflows(&mut self) {
        self.deferred.append(&mut self.overflowed);
    }

    /// Transactions not yet produced: fresh templates plus parked entries.
    pub fn remaining(&self) -> usize {
        self.templates.len() - self.template_idx + self.overflowed.len() + self.deferred.len()
    }

    /// Whether nothing more will ever be produced.
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Whether any entry is parked on a capacity failure.
    pub fn has_blocked(&self) -> bool {
        !self.overflowed.is_empty() || !self.deferred.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AddressSetFactory;

    fn profile(reads: usize, writes: usize, time: Clock) -> TransactionProfile {
        TransactionProfile {
            reads,
            writes,
            time,
            weight: 1,
        }
    }

    #[test]
    fn draws_templates_in_order() {
        let mut source = TransactionSource::new(
            vec![
                ("a".into(), profile(2, 1, 10)),
                ("b".into(), profile(0, 1, 20)),
            ],
            vec![1, 2, 3, 4],
        )
        .unwrap();
        let mut maker = AddressSetFactory::ideal().new_maker();

        let first = source.try_next(&mut maker).unwrap();
        assert_eq!(first.label(), Some("a"));
        assert_eq!(first.time(), 10);
        let second = source.try_next(&mut maker).unwrap();
        assert_eq!(second.label(), Some("b"));
        assert!(second.read_set().is_empty());
        assert_eq!(source.try_next(&mut maker), Err(DrawFailure::Exhausted));
        assert!(source.is_exhausted());
    }

    #[test]
    fn rejects_short_address_arrays() {
        let err = TransactionSource::new(vec![("a".into(), profile(2, 2, 1))], vec![1, 2, 3]);
        assert_eq!(
            err.unwrap_err(),
            ConfigError::NotEnoughAddresses {
                required: 4,
                available: 3,
            }
        );
    }

    #[test]
    fn defers_and_retries_after_reset() {
        // Table of one slot: the two transactions can never be resident
        // together, but can run one after the other.
        let mut source = TransactionSource::new(
            vec![
                ("a".into(), profile(0, 1, 1)),
                ("b".into(), profile(0, 1, 1)),
            ],
            vec![0, 1],
        )
        .unwrap();
        let mut maker = AddressSetFactory::renaming(1, 1).unwrap().new_maker();

        let first = source.try_next(&mut maker).unwrap();
        assert_eq!(source.try_next(&mut maker), Err(DrawFailure::Deferred));
        // Parked entries are not retried until re-armed.
        assert_eq!(source.try_next(&mut maker), Err(DrawFailure::Exhausted));
        assert!(source.has_blocked());
        assert_eq!(source.remaining(), 1);

        maker.free(&first);
        source.reset_overflows();
        let second = source.try_next(&mut maker).unwrap();
        assert_eq!(second.label(), Some("b"));
        assert!(source.is_exhausted());
    }

    #[test]
    fn write_overflow_rolls_back_reads() {
        let mut source =
            TransactionSource::new(vec![("a".into(), profile(1, 1, 1))], vec![0, 1]).unwrap();
        // One slot: the read lands, the write cannot.
        let mut maker = AddressSetFactory::renaming(1, 1).unwrap().new_maker();
        assert_eq!(source.try_next(&mut maker), Err(DrawFailure::Deferred));
        let crate::AddressSetMaker::Renaming(table) = &maker else {
            unreachable!()
        };
        assert!(table.is_vacant());
    }

    #[test]
    fn rename_steps_sum_probe_work() {
        let mut source =
            TransactionSource::new(vec![("a".into(), profile(1, 1, 1))], vec![0, 4]).unwrap();
        let mut maker = AddressSetFactory::renaming(4, 2).unwrap().new_maker();
        let tr = source.try_next(&mut maker).unwrap();
        // Address 0 lands on its first probe; address 4 aliases slot 0 and
        // needs a second probe.
        assert_eq!(tr.rename_steps(), 3);
    }
}
