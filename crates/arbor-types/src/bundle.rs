//! Node bundles: the complete persisted state of one content node.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::TypeError;
use crate::identity::{NodeId, PropertyId};
use crate::name::QName;
use crate::value::{PropertyType, Value};

/// One property of a node.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyEntry {
    /// Property name.
    pub name: QName,
    /// Declared type; every value must be of this type.
    pub ty: PropertyType,
    /// Whether the property may hold any number of values.
    pub multi_valued: bool,
    /// Ordered values.
    pub values: Vec<Value>,
}

impl PropertyEntry {
    /// A single-valued property; the type is taken from the value.
    pub fn single(name: QName, value: Value) -> Self {
        Self {
            name,
            ty: value.property_type(),
            multi_valued: false,
            values: vec![value],
        }
    }

    /// A multi-valued property of the given type.
    pub fn multi(name: QName, ty: PropertyType, values: Vec<Value>) -> Self {
        Self {
            name,
            ty,
            multi_valued: true,
            values,
        }
    }

    /// Check the cardinality and type invariants.
    pub fn validate(&self) -> Result<(), TypeError> {
        if !self.multi_valued && self.values.len() != 1 {
            return Err(TypeError::Cardinality {
                name: self.name.to_string(),
                count: self.values.len(),
            });
        }
        if let Some(bad) = self.values.iter().find(|v| v.property_type() != self.ty) {
            return Err(TypeError::ValueTypeMismatch {
                name: self.name.to_string(),
                expected: self.ty,
                actual: bad.property_type(),
            });
        }
        Ok(())
    }
}

/// A `(name, id)` link from a parent to one child node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChildEntry {
    pub name: QName,
    pub id: NodeId,
}

impl ChildEntry {
    pub fn new(name: QName, id: NodeId) -> Self {
        Self { name, id }
    }
}

/// The persisted state of one content node.
///
/// Equality compares persisted state only; the `is_new` flag is bookkeeping
/// for the writer and does not take part.
#[derive(Clone, Debug)]
pub struct NodeBundle {
    /// Node identifier.
    pub id: NodeId,
    /// Parent node, `None` for the root.
    pub parent_id: Option<NodeId>,
    /// Primary node type.
    pub primary_type: QName,
    /// Mixin node types.
    pub mixin_types: BTreeSet<QName>,
    /// Modification counter, maintained by the caller.
    pub mod_count: u16,
    /// Properties keyed by name.
    pub properties: BTreeMap<QName, PropertyEntry>,
    /// Child links in sibling order.
    pub children: Vec<ChildEntry>,
    /// Nodes additionally sharing this node.
    pub shared_set: BTreeSet<NodeId>,
    /// `true` until the bundle has been persisted once.
    pub is_new: bool,
}

impl NodeBundle {
    /// A new, empty bundle without parent.
    pub fn new(id: NodeId, primary_type: QName) -> Self {
        Self {
            id,
            parent_id: None,
            primary_type,
            mixin_types: BTreeSet::new(),
            mod_count: 0,
            properties: BTreeMap::new(),
            children: Vec::new(),
            shared_set: BTreeSet::new(),
            is_new: true,
        }
    }

    /// Set the parent.
    pub fn with_parent(mut self, parent: NodeId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    /// Returns `true` if this node has no parent.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Add a mixin type.
    pub fn add_mixin(&mut self, name: QName) {
        self.mixin_types.insert(name);
    }

    /// Insert or replace a property.
    pub fn set_property(&mut self, entry: PropertyEntry) {
        self.properties.insert(entry.name.clone(), entry);
    }

    /// Remove a property, returning it if present.
    pub fn remove_property(&mut self, name: &QName) -> Option<PropertyEntry> {
        self.properties.remove(name)
    }

    /// Append a child link.
    pub fn add_child(&mut self, name: QName, id: NodeId) {
        self.children.push(ChildEntry::new(name, id));
    }

    /// Add a node to the shared set.
    pub fn add_shared(&mut self, id: NodeId) {
        self.shared_set.insert(id);
    }

    /// Every `(property, target)` pair held by reference or weak-reference
    /// values of this bundle.
    pub fn reference_targets(&self) -> BTreeSet<(PropertyId, NodeId)> {
        self.properties
            .values()
            .flat_map(|entry| {
                entry.values.iter().filter_map(move |v| {
                    v.reference_target()
                        .map(|target| (PropertyId::new(self.id, entry.name.clone()), target))
                })
            })
            .collect()
    }
}

impl PartialEq for NodeBundle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.parent_id == other.parent_id
            && self.primary_type == other.primary_type
            && self.mixin_types == other.mixin_types
            && self.mod_count == other.mod_count
            && self.properties == other.properties
            && self.children == other.children
            && self.shared_set == other.shared_set
    }
}
