//! Index descriptors and the index error taxonomy

use crate::graph::{EdgeType, Label};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::codec::EncodingError;

/// Identity of a declared index. Each descriptor owns exactly one skiplist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexDescriptor {
    /// `CREATE INDEX ON :Label`
    Label(Label),
    /// `CREATE INDEX ON :Label(prop)`
    LabelProperty(Label, String),
    /// `CREATE EDGE INDEX ON :Type`
    EdgeType(EdgeType),
    /// `CREATE EDGE INDEX ON :Type(prop)`
    EdgeTypeProperty(EdgeType, String),
    /// `CREATE GLOBAL EDGE INDEX ON :(prop)`
    GlobalEdgeProperty(String),
}

impl IndexDescriptor {
    /// Property name this index covers, if it is a property index.
    pub fn property(&self) -> Option<&str> {
        match self {
            IndexDescriptor::Label(_) | IndexDescriptor::EdgeType(_) => None,
            IndexDescriptor::LabelProperty(_, p)
            | IndexDescriptor::EdgeTypeProperty(_, p)
            | IndexDescriptor::GlobalEdgeProperty(p) => Some(p),
        }
    }

    pub fn is_node_index(&self) -> bool {
        matches!(
            self,
            IndexDescriptor::Label(_) | IndexDescriptor::LabelProperty(_, _)
        )
    }

    pub fn is_edge_index(&self) -> bool {
        !self.is_node_index()
    }
}

impl fmt::Display for IndexDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexDescriptor::Label(l) => write!(f, ":{}", l),
            IndexDescriptor::LabelProperty(l, p) => write!(f, ":{}({})", l, p),
            IndexDescriptor::EdgeType(t) => write!(f, ":{} (edge)", t),
            IndexDescriptor::EdgeTypeProperty(t, p) => write!(f, ":{}({}) (edge)", t, p),
            IndexDescriptor::GlobalEdgeProperty(p) => write!(f, ":({}) (global edge)", p),
        }
    }
}

/// Lifecycle of a declared index.
///
/// `Creating -> Active -> Dropping`; the final `Destroyed` state is the
/// release of the last reference to the dropped skiplist. Lookups are
/// rejected with [`IndexError::IndexUnavailable`] outside `Active`; the
/// caller decides whether to fall back to a full scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexStatus {
    Creating,
    Active,
    Dropping,
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexStatus::Creating => "creating",
            IndexStatus::Active => "active",
            IndexStatus::Dropping => "dropping",
        };
        write!(f, "{}", s)
    }
}

/// Errors that can occur during index operations
#[derive(Error, Debug, PartialEq)]
pub enum IndexError {
    #[error("index {0} already exists")]
    AlreadyExists(IndexDescriptor),

    #[error("index {0} not found")]
    NotFound(IndexDescriptor),

    #[error("index {0} is unavailable while being created or dropped")]
    IndexUnavailable(IndexDescriptor),

    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

pub type IndexResult<T> = Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_property() {
        let d = IndexDescriptor::LabelProperty(Label::new("Person"), "age".to_string());
        assert_eq!(d.property(), Some("age"));
        assert!(d.is_node_index());

        let d = IndexDescriptor::EdgeType(EdgeType::new("KNOWS"));
        assert_eq!(d.property(), None);
        assert!(d.is_edge_index());

        let d = IndexDescriptor::GlobalEdgeProperty("since".to_string());
        assert_eq!(d.property(), Some("since"));
        assert!(d.is_edge_index());
    }

    #[test]
    fn test_descriptor_display() {
        let d = IndexDescriptor::LabelProperty(Label::new("Person"), "age".to_string());
        assert_eq!(format!("{}", d), ":Person(age)");
        let d = IndexDescriptor::Label(Label::new("Person"));
        assert_eq!(format!("{}", d), ":Person");
    }

    #[test]
    fn test_error_display() {
        let d = IndexDescriptor::Label(Label::new("Person"));
        let err = IndexError::AlreadyExists(d);
        assert_eq!(format!("{}", err), "index :Person already exists");
    }
}
