//! Anukram Index Subsystem
//!
//! A concurrent, skiplist-backed secondary-index engine for property graph
//! databases: lock-free reads during concurrent writes, snapshot-isolation
//! visibility filtering, online index creation, and deferred reclamation of
//! tombstoned entries.
//!
//! # Architecture
//!
//! - [`skiplist`]: concurrent ordered map. Scans and lookups never wait for
//!   writers; insert/remove relink under fine-grained per-node locks;
//!   unlinked nodes are reclaimed through epoch-based GC.
//! - [`index`]: descriptors for the five index kinds (label,
//!   label-property, edge-type, edge-type-property, global edge-property),
//!   the order-preserving entry codec, and the manager that owns one
//!   skiplist per declared index.
//! - [`txn`]: transaction ids, commit bookkeeping, and the pure
//!   snapshot-isolation visibility filter composed with every lookup.
//! - [`graph`]: the entity ids, labels, and property values shared with
//!   the storage layer, with a fixed total order over values.
//!
//! The crate is consumed by three collaborators: the storage/transaction
//! layer feeds [`index::MutationEvent`]s into
//! [`index::IndexManager::apply`] before commit, the DDL executor calls
//! `create_index`/`drop_index`, and the query planner drives
//! [`index::IndexManager::lookup`].
//!
//! ## Example Usage
//!
//! ```rust
//! use anukram::graph::{EntityId, Label, PropertyMap};
//! use anukram::index::{
//!     EntitySource, EdgeRecord, IndexDescriptor, IndexManager, IndexPredicate, MutationEvent,
//!     NodeRecord,
//! };
//! use anukram::txn::TxnManager;
//! use std::sync::Arc;
//!
//! struct EmptyStore;
//! impl EntitySource for EmptyStore {
//!     fn nodes(&self) -> Box<dyn Iterator<Item = NodeRecord> + '_> {
//!         Box::new(std::iter::empty())
//!     }
//!     fn edges(&self) -> Box<dyn Iterator<Item = EdgeRecord> + '_> {
//!         Box::new(std::iter::empty())
//!     }
//! }
//!
//! let txns = Arc::new(TxnManager::new());
//! let indices = IndexManager::new(Arc::clone(&txns));
//!
//! let ddl = txns.begin();
//! let person = IndexDescriptor::Label(Label::new("Person"));
//! indices.create_index(person.clone(), &EmptyStore, &ddl).unwrap();
//! txns.commit(&ddl);
//!
//! let writer = txns.begin();
//! indices
//!     .apply(
//!         &MutationEvent::NodeCreated {
//!             id: EntityId::new(1),
//!             labels: vec![Label::new("Person")],
//!             properties: PropertyMap::new(),
//!         },
//!         &writer,
//!     )
//!     .unwrap();
//! txns.commit(&writer);
//!
//! let reader = txns.begin();
//! let ids: Vec<_> = indices
//!     .lookup(&person, IndexPredicate::Scan, &reader)
//!     .unwrap()
//!     .collect();
//! assert_eq!(ids, vec![EntityId::new(1)]);
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod graph;
pub mod index;
pub mod skiplist;
pub mod txn;

// Re-export main types for convenience
pub use graph::{EdgeType, EntityId, Label, PropertyMap, PropertyValue};

pub use index::{
    EdgeRecord, EncodingError, EntitySource, IndexDescriptor, IndexError, IndexInfo, IndexKey,
    IndexLookup, IndexManager, IndexPredicate, IndexResult, IndexStatus, MutationEvent, NodeRecord,
};

pub use skiplist::SkipList;

pub use txn::{is_visible, Snapshot, TxnId, TxnManager};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
        assert_eq!(ver, "1.0.0");
    }
}
