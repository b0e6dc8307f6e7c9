//! Transactions and the conflict algebra over groups of them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::{AddressSet, Clock, TxId, TxRef, TxSet};

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(0);

/// An atomic unit of work: declared read and write address sets plus an
/// execution cost in cycles.
///
/// Immutable once created. Identity is a process-wide monotone counter;
/// equality and hashing go through it, never through the sets.
#[derive(Debug)]
pub struct Transaction {
    id: TxId,
    read_set: AddressSet,
    write_set: AddressSet,
    time: Clock,
    label: Option<Arc<str>>,
    rename_steps: u64,
}

impl Transaction {
    /// Create a transaction from already-built address sets.
    pub fn new(read_set: AddressSet, write_set: AddressSet, time: Clock) -> Self {
        Self::with_metadata(read_set, write_set, time, None, 0)
    }

    /// Create a transaction carrying advisory metadata: the template label
    /// it was drawn from and the renaming-probe work its sets cost.
    pub fn with_metadata(
        read_set: AddressSet,
        write_set: AddressSet,
        time: Clock,
        label: Option<Arc<str>>,
        rename_steps: u64,
    ) -> Self {
        Self {
            id: NEXT_TX_ID.fetch_add(1, Ordering::Relaxed),
            read_set,
            write_set,
            time,
            label,
            rename_steps,
        }
    }

    /// Process-wide identity.
    pub fn id(&self) -> TxId {
        self.id
    }

    /// Addresses this transaction reads.
    pub fn read_set(&self) -> &AddressSet {
        &self.read_set
    }

    /// Addresses this transaction writes (and possibly also reads).
    pub fn write_set(&self) -> &AddressSet {
        &self.write_set
    }

    /// Execution cost in cycles.
    pub fn time(&self) -> Clock {
        self.time
    }

    /// Template label, if drawn from a labelled source.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Total renaming-table probes spent building the sets. Advisory.
    pub fn rename_steps(&self) -> u64 {
        self.rename_steps
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Transaction {}

impl std::hash::Hash for Transaction {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// A group of transactions together with the running union of their read
/// and write sets.
///
/// The unions stay consistent with the members across `add`s, which makes
/// the conflict test three disjointness checks instead of a scan. The
/// unions use the same [`AddressSet`] variant as the members; the first
/// added transaction seeds it.
#[derive(Clone, Debug, Default)]
pub struct TransactionSet {
    transactions: TxSet,
    reads: Option<AddressSet>,
    writes: Option<AddressSet>,
}

impl TransactionSet {
    /// An empty set. Compatible with every transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// A set seeded with the given transactions.
    pub fn new_with<I: IntoIterator<Item = TxRef>>(transactions: I) -> Self {
        let mut set = Self::new();
        for tr in transactions {
            set.add(tr);
        }
        set
    }

    /// Add a transaction, folding its sets into the running unions.
    pub fn add(&mut self, transaction: TxRef) {
        self.reads = Some(match self.reads.take() {
            None => transaction.read_set().clone(),
            Some(union) => union.union(transaction.read_set()),
        });
        self.writes = Some(match self.writes.take() {
            None => transaction.write_set().clone(),
            Some(union) => union.union(transaction.write_set()),
        });
        self.transactions.insert(transaction);
    }

    /// Whether `transaction` can run concurrently with every member: its
    /// reads miss the write union, and its writes miss both unions.
    /// Read-read sharing is allowed.
    pub fn compatible(&self, transaction: &Transaction) -> bool {
        match (&self.reads, &self.writes) {
            (Some(reads), Some(writes)) => {
                transaction.read_set().disjoint(writes)
                    && transaction.write_set().disjoint(reads)
                    && transaction.write_set().disjoint(writes)
            }
            _ => true,
        }
    }

    /// Whether merging with `other` introduces no conflict, by the same
    /// three tests over the two groups' unions.
    pub fn compatible_with(&self, other: &TransactionSet) -> bool {
        match (&self.reads, &self.writes, &other.reads, &other.writes) {
            (Some(reads), Some(writes), Some(other_reads), Some(other_writes)) => {
                other_reads.disjoint(writes)
                    && other_writes.disjoint(reads)
                    && other_writes.disjoint(writes)
            }
            _ => true,
        }
    }

    /// The merge of two groups: member union and address-set unions.
    pub fn union_with(&self, other: &TransactionSet) -> TransactionSet {
        let mut transactions = self.transactions.clone();
        for tr in &other.transactions {
            transactions.insert(tr.clone());
        }
        TransactionSet {
            transactions,
            reads: merge(&self.reads, &other.reads),
            writes: merge(&self.writes, &other.writes),
        }
    }

    /// Number of member transactions.
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Whether there are no members.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Whether the transaction is a member.
    pub fn contains(&self, transaction: &TxRef) -> bool {
        self.transactions.contains(transaction)
    }

    /// Members in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &TxRef> {
        self.transactions.iter()
    }

    /// The running read union, if any member has been added.
    pub fn read_union(&self) -> Option<&AddressSet> {
        self.reads.as_ref()
    }

    /// The running write union, if any member has been added.
    pub fn write_union(&self) -> Option<&AddressSet> {
        self.writes.as_ref()
    }
}

fn merge(a: &Option<AddressSet>, b: &Option<AddressSet>) -> Option<AddressSet> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) => Some(x.clone()),
        (None, Some(y)) => Some(y.clone()),
        (Some(x), Some(y)) => Some(x.union(y)),
    }
}
