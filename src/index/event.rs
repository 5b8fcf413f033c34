//! Mutation events routed into the indices
//!
//! The storage/transaction layer calls [`crate::index::IndexManager::apply`]
//! with one of these for every entity change, synchronously and before
//! commit. Events carry the labels and properties the fan-out needs so the
//! index never has to read entities back from the store.

use crate::graph::{EdgeType, EntityId, Label, PropertyMap, PropertyValue};

#[derive(Debug, Clone)]
pub enum MutationEvent {
    NodeCreated {
        id: EntityId,
        labels: Vec<Label>,
        properties: PropertyMap,
    },
    /// Carries the node's labels and properties as of the removal.
    NodeRemoved {
        id: EntityId,
        labels: Vec<Label>,
        properties: PropertyMap,
    },
    LabelAdded {
        id: EntityId,
        label: Label,
        properties: PropertyMap,
    },
    LabelRemoved {
        id: EntityId,
        label: Label,
        properties: PropertyMap,
    },
    /// `new_value: None` means the property was removed.
    NodePropertySet {
        id: EntityId,
        labels: Vec<Label>,
        key: String,
        old_value: Option<PropertyValue>,
        new_value: Option<PropertyValue>,
    },
    EdgeCreated {
        id: EntityId,
        edge_type: EdgeType,
        properties: PropertyMap,
    },
    EdgeRemoved {
        id: EntityId,
        edge_type: EdgeType,
        properties: PropertyMap,
    },
    EdgePropertySet {
        id: EntityId,
        edge_type: EdgeType,
        key: String,
        old_value: Option<PropertyValue>,
        new_value: Option<PropertyValue>,
    },
}

impl MutationEvent {
    /// Entity the event concerns.
    pub fn entity(&self) -> EntityId {
        match self {
            MutationEvent::NodeCreated { id, .. }
            | MutationEvent::NodeRemoved { id, .. }
            | MutationEvent::LabelAdded { id, .. }
            | MutationEvent::LabelRemoved { id, .. }
            | MutationEvent::NodePropertySet { id, .. }
            | MutationEvent::EdgeCreated { id, .. }
            | MutationEvent::EdgeRemoved { id, .. }
            | MutationEvent::EdgePropertySet { id, .. } => *id,
        }
    }
}

/// Snapshot of a live node handed to index backfill.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub id: EntityId,
    pub labels: Vec<Label>,
    pub properties: PropertyMap,
}

/// Snapshot of a live edge handed to index backfill.
#[derive(Debug, Clone)]
pub struct EdgeRecord {
    pub id: EntityId,
    pub edge_type: EdgeType,
    pub properties: PropertyMap,
}

/// Source of currently-live entities, implemented by the storage layer.
/// `create_index` scans it to backfill a new index.
pub trait EntitySource {
    fn nodes(&self) -> Box<dyn Iterator<Item = NodeRecord> + '_>;
    fn edges(&self) -> Box<dyn Iterator<Item = EdgeRecord> + '_>;
}
