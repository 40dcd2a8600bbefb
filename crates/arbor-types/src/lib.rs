//! Foundation types for Arbor.
//!
//! This crate provides the in-memory representation of a content node as it
//! is handed to (and returned from) the persistence layer. Every other Arbor
//! crate depends on `arbor-types`.
//!
//! # Key Types
//!
//! - [`NodeId`] — UUID identifier of a content node
//! - [`QName`] — Qualified name (namespace URI + local name)
//! - [`PropertyId`] — Identity of one property: owning node + property name
//! - [`PropertyType`] — Stable type codes of the value taxonomy
//! - [`Value`] — Tagged property value, including [`BinaryValue`] streams
//! - [`PropertyEntry`] — One (possibly multi-valued) property of a bundle
//! - [`NodeBundle`] — The persisted state of one content node
//! - [`ReferenceRecord`] — Reverse references pointing at one node

pub mod bundle;
pub mod error;
pub mod identity;
pub mod name;
pub mod reference;
pub mod value;

pub use bundle::{ChildEntry, NodeBundle, PropertyEntry};
pub use error::TypeError;
pub use identity::{NodeId, PropertyId};
pub use name::QName;
pub use reference::ReferenceRecord;
pub use value::{BinaryValue, PropertyType, Value};
