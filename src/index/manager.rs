//! Manager for all declared indices
//!
//! Owns the descriptor-to-skiplist mapping, routes entity mutations to
//! every matching index, backfills new indices concurrently with writes,
//! and answers lookups as lazy, visibility-filtered entity id sequences.

use crate::graph::{EntityId, PropertyMap, PropertyValue};
use crate::skiplist::SkipList;
use crate::txn::{is_visible, Snapshot, TxnManager};
use crossbeam_epoch as epoch;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::ops::Bound;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use super::codec::{self, IndexKey};
use super::descriptor::{IndexDescriptor, IndexError, IndexResult, IndexStatus};
use super::entry::EntryStamps;
use super::event::{EdgeRecord, EntitySource, MutationEvent, NodeRecord};

/// Entries buffered per pin by a lookup before the cursor re-seeks.
const LOOKUP_CHUNK: usize = 128;

/// Value predicate of a lookup, applied to property indices.
#[derive(Debug, Clone)]
pub enum IndexPredicate {
    /// Every entry in the index.
    Scan,
    /// Entries whose value equals the given one.
    Equals(PropertyValue),
    /// Entries whose value falls in the given bounds.
    Range {
        lower: Bound<PropertyValue>,
        upper: Bound<PropertyValue>,
    },
}

const STATUS_CREATING: u8 = 0;
const STATUS_ACTIVE: u8 = 1;
const STATUS_DROPPING: u8 = 2;

/// One declared index: a descriptor and the skiplist it owns.
struct IndexHandle {
    descriptor: IndexDescriptor,
    status: AtomicU8,
    entries: SkipList<IndexKey, EntryStamps>,
}

enum EntryOp {
    Insert(IndexKey),
    Tombstone(IndexKey),
}

impl IndexHandle {
    fn new(descriptor: IndexDescriptor) -> Self {
        IndexHandle {
            descriptor,
            status: AtomicU8::new(STATUS_CREATING),
            entries: SkipList::new(),
        }
    }

    fn status(&self) -> IndexStatus {
        match self.status.load(Ordering::SeqCst) {
            STATUS_CREATING => IndexStatus::Creating,
            STATUS_DROPPING => IndexStatus::Dropping,
            _ => IndexStatus::Active,
        }
    }

    fn set_status(&self, status: IndexStatus) {
        let raw = match status {
            IndexStatus::Creating => STATUS_CREATING,
            IndexStatus::Active => STATUS_ACTIVE,
            IndexStatus::Dropping => STATUS_DROPPING,
        };
        self.status.store(raw, Ordering::SeqCst);
    }

    /// Key this index derives from a freshly created (or backfilled) node,
    /// if the node matches the descriptor.
    fn node_creation_key(
        &self,
        id: EntityId,
        labels: &[crate::graph::Label],
        properties: &PropertyMap,
    ) -> Result<Option<IndexKey>, IndexError> {
        let key = match &self.descriptor {
            IndexDescriptor::Label(l) if labels.contains(l) => {
                Some(codec::encode(&self.descriptor, None, id)?)
            }
            IndexDescriptor::LabelProperty(l, p) if labels.contains(l) => {
                match properties.get(p) {
                    Some(v) => Some(codec::encode(&self.descriptor, Some(v), id)?),
                    None => None,
                }
            }
            _ => None,
        };
        Ok(key)
    }

    /// Key this index derives from a freshly created (or backfilled) edge.
    fn edge_creation_key(
        &self,
        id: EntityId,
        edge_type: &crate::graph::EdgeType,
        properties: &PropertyMap,
    ) -> Result<Option<IndexKey>, IndexError> {
        let key = match &self.descriptor {
            IndexDescriptor::EdgeType(t) if t == edge_type => {
                Some(codec::encode(&self.descriptor, None, id)?)
            }
            IndexDescriptor::EdgeTypeProperty(t, p) if t == edge_type => match properties.get(p) {
                Some(v) => Some(codec::encode(&self.descriptor, Some(v), id)?),
                None => None,
            },
            IndexDescriptor::GlobalEdgeProperty(p) => match properties.get(p) {
                Some(v) => Some(codec::encode(&self.descriptor, Some(v), id)?),
                None => None,
            },
            _ => None,
        };
        Ok(key)
    }

    /// Fan one mutation event out into this index's insert/tombstone ops.
    fn entry_ops(&self, event: &MutationEvent) -> Result<Vec<EntryOp>, IndexError> {
        let mut ops = Vec::new();
        match event {
            MutationEvent::NodeCreated {
                id,
                labels,
                properties,
            } => {
                if let Some(key) = self.node_creation_key(*id, labels, properties)? {
                    ops.push(EntryOp::Insert(key));
                }
            }
            MutationEvent::NodeRemoved {
                id,
                labels,
                properties,
            } => {
                if let Some(key) = self.node_creation_key(*id, labels, properties)? {
                    ops.push(EntryOp::Tombstone(key));
                }
            }
            MutationEvent::LabelAdded {
                id,
                label,
                properties,
            } => match &self.descriptor {
                IndexDescriptor::Label(l) if l == label => {
                    ops.push(EntryOp::Insert(codec::encode(&self.descriptor, None, *id)?));
                }
                IndexDescriptor::LabelProperty(l, p) if l == label => {
                    if let Some(v) = properties.get(p) {
                        ops.push(EntryOp::Insert(codec::encode(
                            &self.descriptor,
                            Some(v),
                            *id,
                        )?));
                    }
                }
                _ => {}
            },
            MutationEvent::LabelRemoved {
                id,
                label,
                properties,
            } => match &self.descriptor {
                IndexDescriptor::Label(l) if l == label => {
                    ops.push(EntryOp::Tombstone(codec::encode(
                        &self.descriptor,
                        None,
                        *id,
                    )?));
                }
                IndexDescriptor::LabelProperty(l, p) if l == label => {
                    if let Some(v) = properties.get(p) {
                        ops.push(EntryOp::Tombstone(codec::encode(
                            &self.descriptor,
                            Some(v),
                            *id,
                        )?));
                    }
                }
                _ => {}
            },
            MutationEvent::NodePropertySet {
                id,
                labels,
                key,
                old_value,
                new_value,
            } => {
                if let IndexDescriptor::LabelProperty(l, p) = &self.descriptor {
                    if p == key && labels.contains(l) {
                        if let Some(old) = old_value {
                            ops.push(EntryOp::Tombstone(codec::encode(
                                &self.descriptor,
                                Some(old),
                                *id,
                            )?));
                        }
                        if let Some(new) = new_value {
                            ops.push(EntryOp::Insert(codec::encode(
                                &self.descriptor,
                                Some(new),
                                *id,
                            )?));
                        }
                    }
                }
            }
            MutationEvent::EdgeCreated {
                id,
                edge_type,
                properties,
            } => {
                if let Some(key) = self.edge_creation_key(*id, edge_type, properties)? {
                    ops.push(EntryOp::Insert(key));
                }
            }
            MutationEvent::EdgeRemoved {
                id,
                edge_type,
                properties,
            } => {
                if let Some(key) = self.edge_creation_key(*id, edge_type, properties)? {
                    ops.push(EntryOp::Tombstone(key));
                }
            }
            MutationEvent::EdgePropertySet {
                id,
                edge_type,
                key,
                old_value,
                new_value,
            } => {
                let covers = match &self.descriptor {
                    IndexDescriptor::EdgeTypeProperty(t, p) => p == key && t == edge_type,
                    IndexDescriptor::GlobalEdgeProperty(p) => p == key,
                    _ => false,
                };
                if covers {
                    if let Some(old) = old_value {
                        ops.push(EntryOp::Tombstone(codec::encode(
                            &self.descriptor,
                            Some(old),
                            *id,
                        )?));
                    }
                    if let Some(new) = new_value {
                        ops.push(EntryOp::Insert(codec::encode(
                            &self.descriptor,
                            Some(new),
                            *id,
                        )?));
                    }
                }
            }
        }
        Ok(ops)
    }

    fn apply(&self, event: &MutationEvent, txn: &Snapshot, txns: &TxnManager) -> IndexResult<()> {
        for op in self.entry_ops(event)? {
            match op {
                EntryOp::Insert(key) => self.insert_entry(key, txn, txns),
                EntryOp::Tombstone(key) => self.tombstone_entry(&key, txn),
            }
        }
        Ok(())
    }

    /// Insert an entry stamped with the writing transaction.
    ///
    /// Duplicate keys dedupe exactly-once: a replay by the same transaction
    /// and a backfill/write race both leave a single entry. An entry whose
    /// creator aborted, or whose tombstone is held by this transaction or a
    /// committed one, is replaced; a tombstone held by another active
    /// transaction is left alone.
    fn insert_entry(&self, key: IndexKey, txn: &Snapshot, txns: &TxnManager) {
        loop {
            if self.entries.insert(key.clone(), EntryStamps::new(txn.txn_id())) {
                return;
            }
            let replaceable = {
                let guard = epoch::pin();
                match self.entries.get(&key, &guard) {
                    // Unlinked between our insert and get; try again.
                    None => continue,
                    Some(existing) => {
                        let stamps = existing.value();
                        if txns.is_aborted(stamps.created()) {
                            true
                        } else {
                            match stamps.deleted() {
                                None => return,
                                Some(d) => d == txn.txn_id() || txns.is_committed(d),
                            }
                        }
                    }
                }
            };
            if !replaceable {
                return;
            }
            self.entries.remove_if(&key, |stamps| {
                txns.is_aborted(stamps.created())
                    || stamps
                        .deleted()
                        .map_or(false, |d| d == txn.txn_id() || txns.is_committed(d))
            });
        }
    }

    /// Tombstone the entry for `key` on behalf of the writing transaction.
    fn tombstone_entry(&self, key: &IndexKey, txn: &Snapshot) {
        let guard = epoch::pin();
        if let Some(existing) = self.entries.get(key, &guard) {
            existing.value().tombstone(txn.txn_id());
        }
    }

    /// Populate from the live entities of `source`.
    fn backfill(
        &self,
        source: &dyn EntitySource,
        txn: &Snapshot,
        txns: &TxnManager,
    ) -> IndexResult<usize> {
        let mut inserted = 0;
        if self.descriptor.is_node_index() {
            for NodeRecord {
                id,
                labels,
                properties,
            } in source.nodes()
            {
                if let Some(key) = self.node_creation_key(id, &labels, &properties)? {
                    self.insert_entry(key, txn, txns);
                    inserted += 1;
                }
            }
        } else {
            for EdgeRecord {
                id,
                edge_type,
                properties,
            } in source.edges()
            {
                if let Some(key) = self.edge_creation_key(id, &edge_type, &properties)? {
                    self.insert_entry(key, txn, txns);
                    inserted += 1;
                }
            }
        }
        Ok(inserted)
    }

    /// Physically unlink entries no present or future snapshot can see.
    fn vacuum(&self, watermark: u64, txns: &TxnManager) -> usize {
        let mut victims: Vec<IndexKey> = Vec::new();
        {
            let guard = epoch::pin();
            for entry in self.entries.iter(&guard) {
                let stamps = entry.value();
                if txns.is_aborted(stamps.created()) {
                    victims.push(entry.key().clone());
                    continue;
                }
                if let Some(d) = stamps.deleted() {
                    if txns.is_aborted(d) {
                        // The delete never happened; revive the entry.
                        stamps.clear_tombstone(d);
                    } else if txns.commit_ts(d).map_or(false, |ts| ts < watermark) {
                        victims.push(entry.key().clone());
                    }
                }
            }
        }
        let mut reclaimed = 0;
        for key in victims {
            // Re-check under the victim's lock: the key may have been
            // replaced by a fresh entry since the scan.
            let removed = self.entries.remove_if(&key, |stamps| {
                txns.is_aborted(stamps.created())
                    || stamps
                        .deleted()
                        .map_or(false, |d| txns.commit_ts(d).map_or(false, |ts| ts < watermark))
            });
            if removed {
                reclaimed += 1;
            }
        }
        reclaimed
    }
}

/// Manager for all declared indices.
pub struct IndexManager {
    indices: RwLock<FxHashMap<IndexDescriptor, Arc<IndexHandle>>>,
    txns: Arc<TxnManager>,
}

impl IndexManager {
    pub fn new(txns: Arc<TxnManager>) -> Self {
        IndexManager {
            indices: RwLock::new(FxHashMap::default()),
            txns,
        }
    }

    /// Create an index and backfill it from `source`.
    ///
    /// The index is registered before the backfill starts, so writes
    /// running concurrently with the scan are routed to it; the skiplist's
    /// duplicate-key rejection makes the overlap exactly-once. Lookups are
    /// rejected until the backfill completes and the index turns Active.
    pub fn create_index(
        &self,
        descriptor: IndexDescriptor,
        source: &dyn EntitySource,
        txn: &Snapshot,
    ) -> IndexResult<()> {
        let handle = {
            let mut indices = self.indices.write().unwrap();
            if indices.contains_key(&descriptor) {
                return Err(IndexError::AlreadyExists(descriptor));
            }
            let handle = Arc::new(IndexHandle::new(descriptor.clone()));
            indices.insert(descriptor.clone(), Arc::clone(&handle));
            handle
        };
        info!("Creating index {}", descriptor);
        match handle.backfill(source, txn, &self.txns) {
            Ok(inserted) => {
                handle.set_status(IndexStatus::Active);
                info!("Index {} backfilled with {} entries", descriptor, inserted);
                Ok(())
            }
            Err(err) => {
                self.indices.write().unwrap().remove(&descriptor);
                Err(err)
            }
        }
    }

    /// Drop an index.
    ///
    /// The mapping is removed immediately; the skiplist itself is freed
    /// only when the last in-flight lookup drops its reference, so scans
    /// started before the drop complete on the pre-drop snapshot.
    pub fn drop_index(&self, descriptor: &IndexDescriptor) -> IndexResult<()> {
        let handle = self
            .indices
            .write()
            .unwrap()
            .remove(descriptor)
            .ok_or_else(|| IndexError::NotFound(descriptor.clone()))?;
        handle.set_status(IndexStatus::Dropping);
        info!("Dropped index {}", descriptor);
        Ok(())
    }

    pub fn has_index(&self, descriptor: &IndexDescriptor) -> bool {
        self.indices.read().unwrap().contains_key(descriptor)
    }

    /// Route one mutation event to every matching index. Called
    /// synchronously on each entity change, before commit; idempotent
    /// under replay of the same transaction.
    pub fn apply(&self, event: &MutationEvent, txn: &Snapshot) -> IndexResult<()> {
        let indices = self.indices.read().unwrap();
        for handle in indices.values() {
            handle.apply(event, txn, &self.txns)?;
        }
        Ok(())
    }

    /// Look entities up through an index, as a lazy sequence filtered by
    /// the requesting transaction's snapshot.
    pub fn lookup(
        &self,
        descriptor: &IndexDescriptor,
        predicate: IndexPredicate,
        snapshot: &Snapshot,
    ) -> IndexResult<IndexLookup> {
        let handle = self
            .indices
            .read()
            .unwrap()
            .get(descriptor)
            .cloned()
            .ok_or_else(|| IndexError::NotFound(descriptor.clone()))?;
        if handle.status() != IndexStatus::Active {
            return Err(IndexError::IndexUnavailable(descriptor.clone()));
        }
        let (lower, upper) = predicate_bounds(descriptor, predicate)?;
        Ok(IndexLookup {
            handle,
            txns: Arc::clone(&self.txns),
            snapshot: snapshot.clone(),
            lower,
            upper,
            resume: None,
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }

    /// Linked-entry estimate for the planner; counts tombstones not yet
    /// vacuumed, so it is an upper bound on the live entry count.
    pub fn approximate_entry_count(&self, descriptor: &IndexDescriptor) -> IndexResult<usize> {
        let handle = self
            .indices
            .read()
            .unwrap()
            .get(descriptor)
            .cloned()
            .ok_or_else(|| IndexError::NotFound(descriptor.clone()))?;
        Ok(handle.entries.len())
    }

    /// Enumerate declared indices with their state and size.
    pub fn list_indices(&self) -> Vec<IndexInfo> {
        self.indices
            .read()
            .unwrap()
            .values()
            .map(|handle| IndexInfo {
                descriptor: handle.descriptor.clone(),
                status: handle.status(),
                entry_count: handle.entries.len(),
            })
            .collect()
    }

    /// Reclaim tombstoned and aborted entries no snapshot can observe
    /// anymore. Returns the number of entries unlinked.
    pub fn vacuum(&self) -> usize {
        let watermark = self.txns.watermark();
        let handles: Vec<Arc<IndexHandle>> =
            self.indices.read().unwrap().values().cloned().collect();
        let mut reclaimed = 0;
        for handle in &handles {
            reclaimed += handle.vacuum(watermark, &self.txns);
        }
        debug!(
            "Vacuum reclaimed {} entries below watermark {}",
            reclaimed, watermark
        );
        reclaimed
    }
}

/// Descriptor, state, and size of one declared index.
#[derive(Debug, Clone)]
pub struct IndexInfo {
    pub descriptor: IndexDescriptor,
    pub status: IndexStatus,
    pub entry_count: usize,
}

/// Translate a value predicate into skiplist key bounds.
fn predicate_bounds(
    descriptor: &IndexDescriptor,
    predicate: IndexPredicate,
) -> IndexResult<(Bound<IndexKey>, Bound<IndexKey>)> {
    match predicate {
        IndexPredicate::Scan => Ok((Bound::Unbounded, Bound::Unbounded)),
        IndexPredicate::Equals(value) => {
            if descriptor.property().is_none() {
                return Err(super::codec::EncodingError::NoIndexedProperty.into());
            }
            codec::check_orderable(&value)?;
            Ok((
                Bound::Included(codec::first_key_for(value.clone())),
                Bound::Included(codec::last_key_for(value)),
            ))
        }
        IndexPredicate::Range { lower, upper } => {
            if descriptor.property().is_none() {
                return Err(super::codec::EncodingError::NoIndexedProperty.into());
            }
            let lower = match lower {
                Bound::Included(v) => {
                    codec::check_orderable(&v)?;
                    Bound::Included(codec::first_key_for(v))
                }
                Bound::Excluded(v) => {
                    codec::check_orderable(&v)?;
                    Bound::Excluded(codec::last_key_for(v))
                }
                Bound::Unbounded => Bound::Unbounded,
            };
            let upper = match upper {
                Bound::Included(v) => {
                    codec::check_orderable(&v)?;
                    Bound::Included(codec::last_key_for(v))
                }
                Bound::Excluded(v) => {
                    codec::check_orderable(&v)?;
                    Bound::Excluded(codec::first_key_for(v))
                }
                Bound::Unbounded => Bound::Unbounded,
            };
            Ok((lower, upper))
        }
    }
}

fn bound_as_ref(bound: &Bound<IndexKey>) -> Bound<&IndexKey> {
    match bound {
        Bound::Included(k) => Bound::Included(k),
        Bound::Excluded(k) => Bound::Excluded(k),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// Lazy entity id sequence produced by [`IndexManager::lookup`].
///
/// Holds its own reference to the index, so it keeps working after the
/// index is dropped; buffers a chunk of visible ids per epoch pin and
/// re-seeks from the last scanned key, so the caller may stop consuming at
/// any point with no cleanup obligation.
pub struct IndexLookup {
    handle: Arc<IndexHandle>,
    txns: Arc<TxnManager>,
    snapshot: Snapshot,
    lower: Bound<IndexKey>,
    upper: Bound<IndexKey>,
    resume: Option<IndexKey>,
    buffer: VecDeque<EntityId>,
    exhausted: bool,
}

impl std::fmt::Debug for IndexLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexLookup")
            .field("snapshot", &self.snapshot)
            .field("lower", &self.lower)
            .field("upper", &self.upper)
            .field("resume", &self.resume)
            .field("buffer", &self.buffer)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

impl IndexLookup {
    fn refill(&mut self) {
        let guard = epoch::pin();
        let lower = match &self.resume {
            Some(key) => Bound::Excluded(key),
            None => bound_as_ref(&self.lower),
        };
        let upper = bound_as_ref(&self.upper);
        let mut scanned = 0;
        let mut resume_at: Option<IndexKey> = None;
        for entry in self.handle.entries.range(lower, upper, &guard) {
            scanned += 1;
            let stamps = entry.value();
            if is_visible(
                stamps.created(),
                stamps.deleted(),
                &self.snapshot,
                &self.txns,
            ) {
                self.buffer.push_back(entry.key().entity());
            }
            if scanned >= LOOKUP_CHUNK {
                resume_at = Some(entry.key().clone());
                break;
            }
        }
        match resume_at {
            Some(key) => self.resume = Some(key),
            None => self.exhausted = true,
        }
    }
}

impl Iterator for IndexLookup {
    type Item = EntityId;

    fn next(&mut self) -> Option<EntityId> {
        loop {
            if let Some(id) = self.buffer.pop_front() {
                return Some(id);
            }
            if self.exhausted {
                return None;
            }
            self.refill();
        }
    }
}
