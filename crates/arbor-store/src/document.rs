use std::collections::BTreeMap;
use std::fmt;

use bigdecimal::BigDecimal;
use bytes::Bytes;
use chrono::{DateTime, FixedOffset};

use crate::blob::BlobId;

/// Store-assigned identity of a persisted document.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(u64);

impl RecordId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId(#{})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A store-native field value.
///
/// These are the primitives the backing store understands; everything the
/// persistence layer writes is expressed in terms of them.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Long(i64),
    Double(f64),
    Decimal(BigDecimal),
    String(String),
    Bytes(Bytes),
    DateTime(DateTime<FixedOffset>),
    /// Link to an out-of-line blob.
    Blob(BlobId),
    /// Embedded sub-document (has no identity of its own).
    Embedded(Document),
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<&BigDecimal> {
        match self {
            Self::Decimal(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            Self::DateTime(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&BlobId> {
        match self {
            Self::Blob(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Embedded(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

macro_rules! field_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

field_from! {
    bool => Bool,
    i64 => Long,
    f64 => Double,
    BigDecimal => Decimal,
    String => String,
    &str => String,
    Bytes => Bytes,
    Vec<u8> => Bytes,
    DateTime<FixedOffset> => DateTime,
    BlobId => Blob,
    Document => Embedded,
    Vec<FieldValue> => List,
}

/// A document: an optional class name plus named fields.
///
/// Top-level documents carry the class they are stored under; embedded
/// documents have no class.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    class: Option<String>,
    fields: BTreeMap<String, FieldValue>,
}

impl Document {
    /// An embedded (class-less) document.
    pub fn new() -> Self {
        Self::default()
    }

    /// A document stored under `class`.
    pub fn of_class(class: impl Into<String>) -> Self {
        Self {
            class: Some(class.into()),
            fields: BTreeMap::new(),
        }
    }

    pub fn class(&self) -> Option<&str> {
        self.class.as_deref()
    }

    /// Set a field, replacing any previous value.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Builder form of [`Document::set`].
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_str)
    }

    pub fn get_long(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(FieldValue::as_long)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(FieldValue::as_bool)
    }

    pub fn get_document(&self, field: &str) -> Option<&Document> {
        self.get(field).and_then(FieldValue::as_document)
    }

    pub fn get_list(&self, field: &str) -> Option<&[FieldValue]> {
        self.get(field).and_then(FieldValue::as_list)
    }

    /// Field names in ascending order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// A directed edge from a document to `target`, carrying attributes.
#[derive(Clone, Debug, PartialEq)]
pub struct Edge {
    pub target: RecordId,
    pub attributes: Document,
}

impl Edge {
    pub fn new(target: RecordId, attributes: Document) -> Self {
        Self { target, attributes }
    }
}
