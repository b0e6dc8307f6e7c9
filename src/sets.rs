//! Address-set representations and their per-run allocator.
//!
//! Three variants trade precision for space. The ideal variant is an exact
//! hash set. The approximate variant is a Bloom-filter-like bit vector: it
//! may report conflicts that do not exist but never misses a real one. The
//! renaming variant maps addresses to slots of a fixed-size shared table so
//! a set fits in a W-bit vector exactly; it is the only variant that can
//! run out of room.

use ahash::AHashSet;
use bitvec::prelude::*;
use thiserror::Error;

use crate::{Address, ConfigError, Transaction};

/// A renaming-table insertion found every probe slot held by a different
/// address. Recoverable: the transaction is deferred until completions free
/// slots.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("all probe slots for an address are held by other addresses")]
pub struct CapacityExceeded;

/// A set of memory addresses, in one of three representations.
///
/// Required operations are construction (via [`AddressSetMaker`]), union,
/// intersection, emptiness, and pairwise disjointness. Membership and
/// iteration are deliberately absent: the bit-vector variants cannot answer
/// them.
///
/// Sets only combine with sets of the same variant made by the same maker;
/// mixing variants is a bug and panics.
#[derive(Clone, Debug)]
pub enum AddressSet {
    /// Exact set. Operations are exact; construction never fails.
    Ideal(AHashSet<Address>),
    /// Width-W bit vector with k hash functions. Inserting x sets bits
    /// `(x + i) mod W` for `i < k`. False-positive conflicts are possible,
    /// false negatives are not.
    Approximate(BitVec),
    /// Width-W bit vector whose bit positions are slot indices of a shared
    /// [`RenamingTable`].
    Renaming {
        /// One bit per table slot.
        bits: BitVec,
        /// Addresses this set inserted into the table, with multiplicity.
        /// Derived sets (unions, intersections) hold no slots and leave
        /// this empty; only constructor-made sets are ever freed.
        held: Vec<Address>,
    },
}

impl AddressSet {
    /// Whether the set contains no addresses (no set bits for the
    /// bit-vector variants).
    pub fn is_empty(&self) -> bool {
        match self {
            AddressSet::Ideal(set) => set.is_empty(),
            AddressSet::Approximate(bits) | AddressSet::Renaming { bits, .. } => bits.not_any(),
        }
    }

    /// Whether the two sets share no address. For the approximate variant
    /// a `false` answer may be spurious; `true` never is.
    pub fn disjoint(&self, other: &AddressSet) -> bool {
        match (self, other) {
            (AddressSet::Ideal(a), AddressSet::Ideal(b)) => a.is_disjoint(b),
            (AddressSet::Approximate(a), AddressSet::Approximate(b)) => bits_disjoint(a, b),
            (AddressSet::Renaming { bits: a, .. }, AddressSet::Renaming { bits: b, .. }) => {
                bits_disjoint(a, b)
            }
            _ => panic!(
                "address set variant mismatch: {} vs {}",
                self.kind(),
                other.kind()
            ),
        }
    }

    /// Union with another set of the same variant.
    pub fn union(&self, other: &AddressSet) -> AddressSet {
        match (self, other) {
            (AddressSet::Ideal(a), AddressSet::Ideal(b)) => {
                AddressSet::Ideal(a.union(b).copied().collect())
            }
            (AddressSet::Approximate(a), AddressSet::Approximate(b)) => {
                AddressSet::Approximate(bits_or(a, b))
            }
            (AddressSet::Renaming { bits: a, .. }, AddressSet::Renaming { bits: b, .. }) => {
                AddressSet::Renaming {
                    bits: bits_or(a, b),
                    held: Vec::new(),
                }
            }
            _ => panic!(
                "address set variant mismatch: {} vs {}",
                self.kind(),
                other.kind()
            ),
        }
    }

    /// Intersection with another set of the same variant.
    pub fn intersection(&self, other: &AddressSet) -> AddressSet {
        match (self, other) {
            (AddressSet::Ideal(a), AddressSet::Ideal(b)) => {
                AddressSet::Ideal(a.intersection(b).copied().collect())
            }
            (AddressSet::Approximate(a), AddressSet::Approximate(b)) => {
                AddressSet::Approximate(bits_and(a, b))
            }
            (AddressSet::Renaming { bits: a, .. }, AddressSet::Renaming { bits: b, .. }) => {
                AddressSet::Renaming {
                    bits: bits_and(a, b),
                    held: Vec::new(),
                }
            }
            _ => panic!(
                "address set variant mismatch: {} vs {}",
                self.kind(),
                other.kind()
            ),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AddressSet::Ideal(_) => "ideal",
            AddressSet::Approximate(_) => "approximate",
            AddressSet::Renaming { .. } => "renaming",
        }
    }
}

// The unused tail of the last word is always zero: vectors start from
// `BitVec::repeat(false, _)` and only in-range bits are ever set, so whole
// words can be combined directly.
fn bits_or(a: &BitVec, b: &BitVec) -> BitVec {
    debug_assert_eq!(a.len(), b.len());
    let mut out = a.clone();
    for (dst, src) in out.as_raw_mut_slice().iter_mut().zip(b.as_raw_slice()) {
        *dst |= *src;
    }
    out
}

fn bits_and(a: &BitVec, b: &BitVec) -> BitVec {
    debug_assert_eq!(a.len(), b.len());
    let mut out = a.clone();
    for (dst, src) in out.as_raw_mut_slice().iter_mut().zip(b.as_raw_slice()) {
        *dst &= *src;
    }
    out
}

fn bits_disjoint(a: &BitVec, b: &BitVec) -> bool {
    debug_assert_eq!(a.len(), b.len());
    a.as_raw_slice()
        .iter()
        .zip(b.as_raw_slice())
        .all(|(x, y)| x & y == 0)
}

/// The shared table behind renaming sets: W slots of `(address, refcount)`.
///
/// Every set produced by one renaming maker inserts into the same table, and
/// every completion decrements it, so the maker carrying this table must be
/// duplicated whenever the simulation state is copied.
#[derive(Clone, Debug)]
pub struct RenamingTable {
    slots: Vec<Option<(Address, u32)>>,
    n_funcs: usize,
    history: Vec<u32>,
}

impl RenamingTable {
    fn new(size: usize, n_funcs: usize) -> Self {
        Self {
            slots: vec![None; size],
            n_funcs,
            history: Vec::new(),
        }
    }

    fn width(&self) -> usize {
        self.slots.len()
    }

    /// Find a slot for `addr` among its probe positions `(addr + i) mod W`,
    /// `i < n_funcs`: the first empty slot or one already holding `addr`.
    /// Records the number of probes in the history either way.
    fn insert(&mut self, addr: Address) -> Result<usize, CapacityExceeded> {
        let width = self.slots.len();
        for i in 0..self.n_funcs {
            let h = (addr + i) % width;
            match self.slots[h] {
                None => self.slots[h] = Some((addr, 1)),
                Some((held, count)) if held == addr => self.slots[h] = Some((addr, count + 1)),
                Some(_) => continue,
            }
            self.history.push(i as u32 + 1);
            return Ok(h);
        }
        self.history.push(self.n_funcs as u32);
        Err(CapacityExceeded)
    }

    fn release(&mut self, addr: Address) {
        let width = self.slots.len();
        for i in 0..self.n_funcs {
            let h = (addr + i) % width;
            match self.slots[h] {
                Some((held, 1)) if held == addr => self.slots[h] = None,
                Some((held, count)) if held == addr => self.slots[h] = Some((addr, count - 1)),
                _ => continue,
            }
            return;
        }
        panic!("released address {addr} holds no slot in the renaming table");
    }

    /// Whether every slot is free. A balanced sequence of insertions and
    /// releases returns the table to this state.
    pub fn is_vacant(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

/// Per-run allocator of address sets.
///
/// One simulation run owns one maker. The renaming maker carries the shared
/// table mutated by every set it produces and by every [`free`] call, which
/// is why states clone their maker rather than share it across branches.
///
/// [`free`]: AddressSetMaker::free
#[derive(Clone, Debug)]
pub enum AddressSetMaker {
    /// Produces exact sets.
    Ideal,
    /// Produces Bloom-filter sets of the given width and hash count.
    Approximate {
        /// Bit-vector width.
        size: usize,
        /// Number of hash functions.
        n_funcs: usize,
    },
    /// Produces renaming sets backed by the contained table.
    Renaming(RenamingTable),
}

impl AddressSetMaker {
    /// Build a set containing `addresses`. Only the renaming variant can
    /// fail; when it does, its partial insertions have already been rolled
    /// back.
    pub fn make(&mut self, addresses: &[Address]) -> Result<AddressSet, CapacityExceeded> {
        match self {
            AddressSetMaker::Ideal => Ok(AddressSet::Ideal(addresses.iter().copied().collect())),
            AddressSetMaker::Approximate { size, n_funcs } => {
                let mut bits = BitVec::repeat(false, *size);
                for &addr in addresses {
                    for i in 0..*n_funcs {
                        bits.set((addr + i) % *size, true);
                    }
                }
                Ok(AddressSet::Approximate(bits))
            }
            AddressSetMaker::Renaming(table) => {
                let mut bits = BitVec::repeat(false, table.width());
                let mut held = Vec::with_capacity(addresses.len());
                for &addr in addresses {
                    match table.insert(addr) {
                        Ok(slot) => {
                            bits.set(slot, true);
                            held.push(addr);
                        }
                        Err(err) => {
                            for &inserted in &held {
                                table.release(inserted);
                            }
                            return Err(err);
                        }
                    }
                }
                Ok(AddressSet::Renaming { bits, held })
            }
        }
    }

    /// Release the table slots held by a completed transaction's sets.
    /// A no-op for the ideal and approximate variants.
    pub fn free(&mut self, transaction: &Transaction) {
        let AddressSetMaker::Renaming(table) = self else {
            return;
        };
        for set in [transaction.read_set(), transaction.write_set()] {
            let AddressSet::Renaming { held, .. } = set else {
                panic!("renaming maker freeing a {} set", set.kind());
            };
            for &addr in held {
                table.release(addr);
            }
        }
    }

    /// Release table slots for raw addresses. Used by the transaction
    /// source to roll back an already-built read set when the matching
    /// write set overflows.
    pub fn free_addresses(&mut self, addresses: &[Address]) {
        if let AddressSetMaker::Renaming(table) = self {
            for &addr in addresses {
                table.release(addr);
            }
        }
    }

    /// Probe attempts per insertion, oldest first. `None` for variants that
    /// do not probe.
    pub fn history(&self) -> Option<&[u32]> {
        match self {
            AddressSetMaker::Renaming(table) => Some(table.history.as_slice()),
            _ => None,
        }
    }
}

/// Validated parameters for one family of address sets; mints a fresh maker
/// per simulation run.
#[derive(Clone, Debug)]
pub enum AddressSetFactory {
    /// Exact sets.
    Ideal,
    /// Bloom-filter sets.
    Approximate {
        /// Bit-vector width.
        size: usize,
        /// Number of hash functions.
        n_funcs: usize,
    },
    /// Renaming-table sets.
    Renaming {
        /// Table width in slots.
        size: usize,
        /// Number of probe positions per address.
        n_funcs: usize,
    },
}

impl AddressSetFactory {
    /// Factory for exact sets.
    pub fn ideal() -> Self {
        AddressSetFactory::Ideal
    }

    /// Factory for approximate sets of `size` bits with `n_funcs` hash
    /// functions.
    pub fn approximate(size: usize, n_funcs: usize) -> Result<Self, ConfigError> {
        if size == 0 {
            return Err(ConfigError::MustBePositive("size"));
        }
        if n_funcs == 0 {
            return Err(ConfigError::MustBePositive("n_hash_funcs"));
        }
        Ok(AddressSetFactory::Approximate { size, n_funcs })
    }

    /// Factory for renaming sets over a table of `size` slots probed at
    /// `n_funcs` positions.
    pub fn renaming(size: usize, n_funcs: usize) -> Result<Self, ConfigError> {
        if size == 0 {
            return Err(ConfigError::MustBePositive("size"));
        }
        if n_funcs == 0 {
            return Err(ConfigError::MustBePositive("n_hash_funcs"));
        }
        Ok(AddressSetFactory::Renaming { size, n_funcs })
    }

    /// Mint the maker for one run.
    pub fn new_maker(&self) -> AddressSetMaker {
        match *self {
            AddressSetFactory::Ideal => AddressSetMaker::Ideal,
            AddressSetFactory::Approximate { size, n_funcs } => {
                AddressSetMaker::Approximate { size, n_funcs }
            }
            AddressSetFactory::Renaming { size, n_funcs } => {
                AddressSetMaker::Renaming(RenamingTable::new(size, n_funcs))
            }
        }
    }
}
