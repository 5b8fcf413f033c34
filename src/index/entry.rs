//! Per-entry transaction stamps
//!
//! Every skiplist entry carries the transaction that created it and, once
//! logically deleted, the transaction that tombstoned it. Tombstoned
//! entries stay linked so concurrent snapshots can keep seeing them; they
//! are physically unlinked only by vacuum, once no active transaction can
//! observe them.

use crate::txn::TxnId;
use std::sync::atomic::{AtomicU64, Ordering};

/// `deleted` sentinel: entry is live.
const LIVE: u64 = 0;

#[derive(Debug)]
pub struct EntryStamps {
    created: TxnId,
    deleted: AtomicU64,
}

impl EntryStamps {
    pub fn new(created: TxnId) -> Self {
        EntryStamps {
            created,
            deleted: AtomicU64::new(LIVE),
        }
    }

    pub fn created(&self) -> TxnId {
        self.created
    }

    pub fn deleted(&self) -> Option<TxnId> {
        match self.deleted.load(Ordering::SeqCst) {
            LIVE => None,
            txn => Some(txn),
        }
    }

    pub fn is_tombstoned(&self) -> bool {
        self.deleted().is_some()
    }

    /// Tombstone the entry on behalf of `txn`. Idempotent for the same
    /// transaction; returns `false` if a different transaction already
    /// holds the tombstone (the conflict is the transaction layer's to
    /// resolve).
    pub fn tombstone(&self, txn: TxnId) -> bool {
        match self
            .deleted
            .compare_exchange(LIVE, txn, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => true,
            Err(current) => current == txn,
        }
    }

    /// Undo a tombstone left by an aborted transaction.
    pub fn clear_tombstone(&self, txn: TxnId) -> bool {
        self.deleted
            .compare_exchange(txn, LIVE, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}
