//! Graph model types shared with the storage layer
//!
//! The index subsystem does not own entities; it only needs their ids,
//! labels, edge types, and property values, with a fixed total order over
//! values so that range scans agree with the query language.

pub mod property;
pub mod types;

// Re-export main types
pub use property::{PropertyMap, PropertyValue};
pub use types::{EdgeType, EntityId, Label};
