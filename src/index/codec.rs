//! Index entry codec
//!
//! Maps a `(descriptor, value, entity)` tuple to a key whose ordering in
//! the skiplist matches the query language's value ordering (see
//! [`crate::graph::property`] for the fixed total order). Encoding is pure
//! and injective for `(value, entity)` under a fixed descriptor, and
//! exactly invertible: equality and range lookups never go through a lossy
//! representation.
//!
//! Label and edge-type indices carry no value; the missing value sorts
//! before every present value (nulls-first, fixed policy).

use crate::graph::{EntityId, PropertyValue};
use thiserror::Error;

use super::descriptor::IndexDescriptor;

/// Errors raised while encoding a value into an index key
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("values of type {type_name} cannot be ordered by an index")]
    UnorderableType { type_name: &'static str },

    #[error("property index requires a value for entity {0}")]
    MissingValue(EntityId),

    #[error("label or edge-type index cannot carry a value for entity {0}")]
    UnexpectedValue(EntityId),

    #[error("index does not cover a property; value predicates are not supported")]
    NoIndexedProperty,
}

/// Sortable key of one index entry.
///
/// Ordered by `(value, entity)` with an absent value first, so all entries
/// of a label or edge-type index collate purely by entity id and property
/// entries group by value with the entity id as tie-breaker.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexKey {
    value: Option<PropertyValue>,
    entity: EntityId,
}

impl IndexKey {
    pub fn value(&self) -> Option<&PropertyValue> {
        self.value.as_ref()
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }
}

/// Maps cannot participate in range scans: their keys are unordered, so no
/// order over them agrees with equality lookups done elsewhere. Lists are
/// ordered lexicographically but must not smuggle a map in either.
pub(super) fn check_orderable(value: &PropertyValue) -> Result<(), EncodingError> {
    match value {
        PropertyValue::Map(_) => Err(EncodingError::UnorderableType {
            type_name: value.type_name(),
        }),
        PropertyValue::List(items) => {
            for item in items {
                check_orderable(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Encode one index entry key. Pure; fails only on value/descriptor shape
/// mismatches and unorderable value types.
pub fn encode(
    descriptor: &IndexDescriptor,
    value: Option<&PropertyValue>,
    entity: EntityId,
) -> Result<IndexKey, EncodingError> {
    match (descriptor.property(), value) {
        (Some(_), Some(v)) => {
            check_orderable(v)?;
            Ok(IndexKey {
                value: Some(v.clone()),
                entity,
            })
        }
        (None, None) => Ok(IndexKey {
            value: None,
            entity,
        }),
        (Some(_), None) => Err(EncodingError::MissingValue(entity)),
        (None, Some(_)) => Err(EncodingError::UnexpectedValue(entity)),
    }
}

/// Inverse of [`encode`]: recover the embedded components.
pub fn decode(key: &IndexKey) -> (Option<&PropertyValue>, EntityId) {
    (key.value(), key.entity())
}

/// Smallest key that can carry `value`, used as a range lower bound.
pub(super) fn first_key_for(value: PropertyValue) -> IndexKey {
    IndexKey {
        value: Some(value),
        entity: EntityId::new(u64::MIN),
    }
}

/// Largest key that can carry `value`, used as a range upper bound.
pub(super) fn last_key_for(value: PropertyValue) -> IndexKey {
    IndexKey {
        value: Some(value),
        entity: EntityId::new(u64::MAX),
    }
}
