//! Transaction bookkeeping and snapshot-isolation visibility
//!
//! The index does not run transactions; it only needs enough of their
//! lifecycle to filter scan results: begin/commit/abort, a logical clock
//! shared by begin and commit timestamps, and the oldest-active watermark
//! that gates physical reclamation.
//!
//! Visibility is a pure function over an entry's stamps, composed with the
//! scan rather than baked into the skiplist.

use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Transaction identifier. Equal to the transaction's begin timestamp on
/// the shared logical clock; 0 is never issued.
pub type TxnId = u64;

/// A transaction's consistent view: its own id plus its start timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    txn_id: TxnId,
    start_ts: u64,
}

impl Snapshot {
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    pub fn start_ts(&self) -> u64 {
        self.start_ts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed(u64),
    Aborted,
}

#[derive(Debug, Clone, Copy)]
struct TxnRecord {
    start_ts: u64,
    state: TxnState,
}

/// Allocates transaction ids, records commits and aborts, and answers the
/// visibility and watermark queries the index needs.
#[derive(Debug)]
pub struct TxnManager {
    /// Logical clock; begin and commit both consume a tick.
    clock: AtomicU64,
    txns: RwLock<FxHashMap<TxnId, TxnRecord>>,
}

impl TxnManager {
    pub fn new() -> Self {
        TxnManager {
            clock: AtomicU64::new(1),
            txns: RwLock::new(FxHashMap::default()),
        }
    }

    /// Start a transaction and return its snapshot.
    pub fn begin(&self) -> Snapshot {
        let ts = self.clock.fetch_add(1, Ordering::SeqCst);
        let record = TxnRecord {
            start_ts: ts,
            state: TxnState::Active,
        };
        self.txns.write().unwrap().insert(ts, record);
        Snapshot {
            txn_id: ts,
            start_ts: ts,
        }
    }

    /// Commit a transaction, assigning its commit timestamp.
    pub fn commit(&self, snapshot: &Snapshot) -> u64 {
        let ts = self.clock.fetch_add(1, Ordering::SeqCst);
        if let Some(record) = self.txns.write().unwrap().get_mut(&snapshot.txn_id) {
            record.state = TxnState::Committed(ts);
        }
        ts
    }

    /// Abort a transaction. Its index entries stay permanently invisible
    /// and are reclaimed by the next vacuum.
    pub fn abort(&self, snapshot: &Snapshot) {
        if let Some(record) = self.txns.write().unwrap().get_mut(&snapshot.txn_id) {
            record.state = TxnState::Aborted;
        }
    }

    /// Commit timestamp of `txn`, if it committed.
    pub fn commit_ts(&self, txn: TxnId) -> Option<u64> {
        match self.txns.read().unwrap().get(&txn).map(|r| r.state) {
            Some(TxnState::Committed(ts)) => Some(ts),
            _ => None,
        }
    }

    pub fn is_committed(&self, txn: TxnId) -> bool {
        self.commit_ts(txn).is_some()
    }

    pub fn is_aborted(&self, txn: TxnId) -> bool {
        matches!(
            self.txns.read().unwrap().get(&txn).map(|r| r.state),
            Some(TxnState::Aborted)
        )
    }

    /// Oldest start timestamp among active transactions, or the current
    /// clock value if none are active. Nothing committed below the
    /// watermark can still become visible to any present or future
    /// snapshot's "before my start" test, so tombstones whose deleter
    /// committed below it are reclaimable.
    pub fn watermark(&self) -> u64 {
        let txns = self.txns.read().unwrap();
        txns.values()
            .filter(|r| r.state == TxnState::Active)
            .map(|r| r.start_ts)
            .min()
            .unwrap_or_else(|| self.clock.load(Ordering::SeqCst))
    }
}

impl Default for TxnManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot-isolation visibility test for one index entry.
///
/// Visible iff the creator is the requester itself or committed before the
/// snapshot started, and the deleter (if any) is neither the requester nor
/// committed before the snapshot started.
pub fn is_visible(
    created: TxnId,
    deleted: Option<TxnId>,
    snapshot: &Snapshot,
    txns: &TxnManager,
) -> bool {
    let committed_before = |txn: TxnId| match txns.commit_ts(txn) {
        Some(ts) => ts < snapshot.start_ts,
        None => false,
    };
    if created != snapshot.txn_id && !committed_before(created) {
        return false;
    }
    match deleted {
        None => true,
        Some(d) => d != snapshot.txn_id && !committed_before(d),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_commit_ordering() {
        let txns = TxnManager::new();
        let t1 = txns.begin();
        let commit = txns.commit(&t1);
        assert!(commit > t1.start_ts());

        let t2 = txns.begin();
        assert!(t2.start_ts() > commit);
    }

    #[test]
    fn test_own_writes_visible() {
        let txns = TxnManager::new();
        let t1 = txns.begin();
        assert!(is_visible(t1.txn_id(), None, &t1, &txns));
        // Own delete hides the entry from itself.
        assert!(!is_visible(t1.txn_id(), Some(t1.txn_id()), &t1, &txns));
    }

    #[test]
    fn test_uncommitted_invisible_to_others() {
        let txns = TxnManager::new();
        let writer = txns.begin();
        let reader = txns.begin();
        assert!(!is_visible(writer.txn_id(), None, &reader, &txns));
    }

    #[test]
    fn test_committed_before_start_visible() {
        let txns = TxnManager::new();
        let writer = txns.begin();
        txns.commit(&writer);
        let reader = txns.begin();
        assert!(is_visible(writer.txn_id(), None, &reader, &txns));
    }

    #[test]
    fn test_delete_committed_after_start_still_visible() {
        let txns = TxnManager::new();
        let writer = txns.begin();
        txns.commit(&writer);
        let reader = txns.begin();
        let deleter = txns.begin();
        txns.commit(&deleter);
        // The deleter committed after the reader's snapshot started.
        assert!(is_visible(writer.txn_id(), Some(deleter.txn_id()), &reader, &txns));

        let late_reader = txns.begin();
        assert!(!is_visible(
            writer.txn_id(),
            Some(deleter.txn_id()),
            &late_reader,
            &txns
        ));
    }

    #[test]
    fn test_aborted_writer_invisible() {
        let txns = TxnManager::new();
        let writer = txns.begin();
        txns.abort(&writer);
        let reader = txns.begin();
        assert!(!is_visible(writer.txn_id(), None, &reader, &txns));
    }

    #[test]
    fn test_watermark_tracks_oldest_active() {
        let txns = TxnManager::new();
        let t1 = txns.begin();
        let t2 = txns.begin();
        assert_eq!(txns.watermark(), t1.start_ts());
        txns.commit(&t1);
        assert_eq!(txns.watermark(), t2.start_ts());
        txns.abort(&t2);
        // No active transactions: watermark advances to the clock.
        assert!(txns.watermark() > t2.start_ts());
    }
}
