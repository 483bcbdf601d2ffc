//! Fixed-capacity transaction slab (§3 "Pool", C9), grounded on the
//! teacher's `endpoint/mod.rs`: a `slab::Slab` keyed by an opaque handle,
//! plus an `FxHashMap` index from the protocol-level key to that handle.
//! `slab::Slab` grows on demand by default; the pool enforces a hard cap
//! itself (`CfdpError::PoolExhausted`) since the spec has no unbounded
//! allocator (§5).

use fxhash::FxHashMap;
use slab::Slab;

use crate::error::{CfdpError, Result};
use crate::ports::{EventId, Reporter, Severity};
use crate::transaction::{Transaction, TransactionKey};

/// Opaque slot handle, stable for the transaction's lifetime in the pool.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PoolHandle(usize);

pub struct Pool {
    slots: Slab<Transaction>,
    index: FxHashMap<TransactionKey, PoolHandle>,
    capacity: usize,
}

impl Pool {
    pub fn new(capacity: usize) -> Self {
        Pool {
            slots: Slab::with_capacity(capacity),
            index: FxHashMap::default(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, key: TransactionKey) -> Option<&Transaction> {
        self.index.get(&key).map(|h| &self.slots[h.0])
    }

    pub fn get_mut(&mut self, key: TransactionKey) -> Option<&mut Transaction> {
        let handle = *self.index.get(&key)?;
        Some(&mut self.slots[handle.0])
    }

    pub fn handle_of(&self, key: TransactionKey) -> Option<PoolHandle> {
        self.index.get(&key).copied()
    }

    pub fn get_by_handle_mut(&mut self, handle: PoolHandle) -> Option<&mut Transaction> {
        self.slots.get_mut(handle.0)
    }

    /// Allocate a new slot for `txn`, reporting and refusing if the pool is
    /// already at `capacity` (§7: per-fault report, continue operating).
    pub fn insert<R: Reporter>(&mut self, txn: Transaction, reporter: &mut R) -> Result<PoolHandle> {
        if self.slots.len() >= self.capacity {
            reporter.event(
                Severity::Error,
                EventId::PoolExhausted,
                "transaction pool is at capacity",
            );
            return Err(CfdpError::PoolExhausted);
        }
        let key = txn.key;
        let slot = self.slots.insert(txn);
        let handle = PoolHandle(slot);
        self.index.insert(key, handle);
        Ok(handle)
    }

    /// Remove and return a slot's transaction (e.g. once reaped to
    /// history).
    pub fn remove(&mut self, handle: PoolHandle) -> Option<Transaction> {
        if !self.slots.contains(handle.0) {
            return None;
        }
        let txn = self.slots.remove(handle.0);
        self.index.remove(&txn.key);
        Some(txn)
    }

    /// Iterate over every live transaction's handle, for the engine's
    /// per-wakeup tick pass.
    pub fn handles(&self) -> impl Iterator<Item = PoolHandle> + '_ {
        self.slots.iter().map(|(i, _)| PoolHandle(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::NullReporter;
    use crate::transaction::Role;

    fn key(seq: u64) -> TransactionKey {
        TransactionKey {
            source_eid: 1,
            sequence_number: seq,
        }
    }

    #[test]
    fn insert_lookup_and_remove_roundtrip() {
        let mut pool = Pool::new(2);
        let mut rep = NullReporter;
        let h = pool
            .insert(Transaction::new(key(1), 1, 2, Role::R1), &mut rep)
            .unwrap();
        assert!(pool.get(key(1)).is_some());
        assert_eq!(pool.len(), 1);

        let removed = pool.remove(h).unwrap();
        assert_eq!(removed.key, key(1));
        assert!(pool.get(key(1)).is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn exhaustion_is_reported_and_refused() {
        let mut pool = Pool::new(1);
        let mut rep = NullReporter;
        pool.insert(Transaction::new(key(1), 1, 2, Role::R1), &mut rep)
            .unwrap();
        let result = pool.insert(Transaction::new(key(2), 1, 2, Role::R1), &mut rep);
        assert!(matches!(result, Err(CfdpError::PoolExhausted)));
    }
}
