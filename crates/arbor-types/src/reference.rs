use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::identity::{NodeId, PropertyId};

/// Reverse references: the properties holding a reference or weak
/// reference to one target node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    /// The referenced node.
    pub target: NodeId,
    references: BTreeSet<PropertyId>,
}

impl ReferenceRecord {
    /// An empty record for `target`.
    pub fn new(target: NodeId) -> Self {
        Self {
            target,
            references: BTreeSet::new(),
        }
    }

    /// Build a record from an iterator of referencing properties.
    pub fn with_references(target: NodeId, refs: impl IntoIterator<Item = PropertyId>) -> Self {
        Self {
            target,
            references: refs.into_iter().collect(),
        }
    }

    /// Add a referencing property. Returns `false` if it was already present.
    pub fn add(&mut self, property: PropertyId) -> bool {
        self.references.insert(property)
    }

    /// Remove a referencing property. Returns `true` if it was present.
    pub fn remove(&mut self, property: &PropertyId) -> bool {
        self.references.remove(property)
    }

    pub fn contains(&self, property: &PropertyId) -> bool {
        self.references.contains(property)
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// Referencing properties in ascending order.
    pub fn references(&self) -> impl Iterator<Item = &PropertyId> {
        self.references.iter()
    }
}
