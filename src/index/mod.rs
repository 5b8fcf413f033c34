//! Index subsystem
//!
//! One skiplist per declared index, a codec that keeps skiplist order in
//! agreement with the value order of the query language, and a manager
//! that routes mutations, backfills, lookups, and reclamation.

pub mod codec;
pub mod descriptor;
pub mod entry;
pub mod event;
pub mod manager;

pub use codec::{decode, encode, EncodingError, IndexKey};
pub use descriptor::{IndexDescriptor, IndexError, IndexResult, IndexStatus};
pub use entry::EntryStamps;
pub use event::{EdgeRecord, EntitySource, MutationEvent, NodeRecord};
pub use manager::{IndexInfo, IndexLookup, IndexManager, IndexPredicate};
