use thiserror::Error;

use crate::value::PropertyType;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    #[error("invalid qualified name: {0}")]
    InvalidName(String),

    #[error("invalid property id: {0}")]
    InvalidPropertyId(String),

    #[error("unknown property type code: {0}")]
    UnknownPropertyType(i64),

    #[error("single-valued property {name} holds {count} values")]
    Cardinality { name: String, count: usize },

    #[error("property {name} declared as {expected} holds a {actual} value")]
    ValueTypeMismatch {
        name: String,
        expected: PropertyType,
        actual: PropertyType,
    },
}
