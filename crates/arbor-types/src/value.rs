//! The typed value taxonomy carried by node properties.
//!
//! [`Value`] is a closed sum type: every variant has exactly one encoding in
//! the persistence layer, and adding a type means adding a variant here.

use std::fmt;
use std::io::{self, Cursor, Read};
use std::sync::Arc;

use bigdecimal::BigDecimal;
use bytes::Bytes;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::identity::NodeId;
use crate::name::QName;

/// Type code of a property value.
///
/// The integer codes are persisted and must never be renumbered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PropertyType {
    String,
    Binary,
    Long,
    Double,
    Date,
    Boolean,
    Name,
    Path,
    Reference,
    WeakReference,
    Uri,
    Decimal,
}

impl PropertyType {
    /// Every type, in code order.
    pub const ALL: [PropertyType; 12] = [
        Self::String,
        Self::Binary,
        Self::Long,
        Self::Double,
        Self::Date,
        Self::Boolean,
        Self::Name,
        Self::Path,
        Self::Reference,
        Self::WeakReference,
        Self::Uri,
        Self::Decimal,
    ];

    /// The persisted integer code.
    pub fn code(self) -> i64 {
        match self {
            Self::String => 1,
            Self::Binary => 2,
            Self::Long => 3,
            Self::Double => 4,
            Self::Date => 5,
            Self::Boolean => 6,
            Self::Name => 7,
            Self::Path => 8,
            Self::Reference => 9,
            Self::WeakReference => 10,
            Self::Uri => 11,
            Self::Decimal => 12,
        }
    }

    /// Parse a persisted integer code.
    pub fn from_code(code: i64) -> Result<Self, TypeError> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.code() == code)
            .ok_or(TypeError::UnknownPropertyType(code))
    }

    /// Returns `true` for reference and weak-reference types.
    pub fn is_reference(self) -> bool {
        matches!(self, Self::Reference | Self::WeakReference)
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "String",
            Self::Binary => "Binary",
            Self::Long => "Long",
            Self::Double => "Double",
            Self::Date => "Date",
            Self::Boolean => "Boolean",
            Self::Name => "Name",
            Self::Path => "Path",
            Self::Reference => "Reference",
            Self::WeakReference => "WeakReference",
            Self::Uri => "URI",
            Self::Decimal => "Decimal",
        };
        f.write_str(name)
    }
}

/// Upper bound on the buffer reserved up front when reading a stream.
const PREALLOC_LIMIT: u64 = 64 * 1024;

type StreamFactory = Arc<dyn Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync>;

#[derive(Clone)]
enum BinarySource {
    Bytes(Bytes),
    Stream(StreamFactory),
}

/// A binary value of declared length.
///
/// The content is either held in memory or produced on demand by a stream
/// factory; opening the stream may fail, which the persistence layer reports
/// as a value write failure.
#[derive(Clone)]
pub struct BinaryValue {
    len: u64,
    source: BinarySource,
}

impl BinaryValue {
    /// Binary value backed by in-memory bytes.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            len: data.len() as u64,
            source: BinarySource::Bytes(data),
        }
    }

    /// Binary value of `len` bytes produced by `open` each time it is read.
    pub fn from_stream<F>(len: u64, open: F) -> Self
    where
        F: Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync + 'static,
    {
        Self {
            len,
            source: BinarySource::Stream(Arc::new(open)),
        }
    }

    /// Declared length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` if the declared length is zero.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The in-memory bytes, if this value is not stream-backed.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.source {
            BinarySource::Bytes(b) => Some(b.as_ref()),
            BinarySource::Stream(_) => None,
        }
    }

    /// Open a reader over the content.
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match &self.source {
            BinarySource::Bytes(b) => Ok(Box::new(Cursor::new(b.clone()))),
            BinarySource::Stream(open) => open(),
        }
    }

    /// Read the whole content into memory.
    pub fn to_bytes(&self) -> io::Result<Bytes> {
        match &self.source {
            BinarySource::Bytes(b) => Ok(b.clone()),
            BinarySource::Stream(_) => {
                let mut buf = Vec::with_capacity(self.len.min(PREALLOC_LIMIT) as usize);
                self.open()?.read_to_end(&mut buf)?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

/// Binary values are equal when their content is. A stream that cannot be
/// read compares unequal to everything but itself.
impl PartialEq for BinaryValue {
    fn eq(&self, other: &Self) -> bool {
        if self.len != other.len {
            return false;
        }
        match (&self.source, &other.source) {
            (BinarySource::Bytes(a), BinarySource::Bytes(b)) => a == b,
            (BinarySource::Stream(a), BinarySource::Stream(b)) if Arc::ptr_eq(a, b) => true,
            _ => match (self.to_bytes(), other.to_bytes()) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl fmt::Debug for BinaryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryValue")
            .field("len", &self.len)
            .field("in_memory", &matches!(self.source, BinarySource::Bytes(_)))
            .finish()
    }
}

/// One property value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Binary(BinaryValue),
    Double(f64),
    Decimal(BigDecimal),
    Long(i64),
    Boolean(bool),
    Name(QName),
    Date(DateTime<FixedOffset>),
    Reference(NodeId),
    WeakReference(NodeId),
    String(String),
    Path(String),
    Uri(String),
}

impl Value {
    /// The type code of this value.
    pub fn property_type(&self) -> PropertyType {
        match self {
            Self::Binary(_) => PropertyType::Binary,
            Self::Double(_) => PropertyType::Double,
            Self::Decimal(_) => PropertyType::Decimal,
            Self::Long(_) => PropertyType::Long,
            Self::Boolean(_) => PropertyType::Boolean,
            Self::Name(_) => PropertyType::Name,
            Self::Date(_) => PropertyType::Date,
            Self::Reference(_) => PropertyType::Reference,
            Self::WeakReference(_) => PropertyType::WeakReference,
            Self::String(_) => PropertyType::String,
            Self::Path(_) => PropertyType::Path,
            Self::Uri(_) => PropertyType::Uri,
        }
    }

    /// Target node of a reference or weak reference.
    pub fn reference_target(&self) -> Option<NodeId> {
        match self {
            Self::Reference(id) | Self::WeakReference(id) => Some(*id),
            _ => None,
        }
    }

    /// Convenience constructor for binary values held in memory.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(BinaryValue::from_bytes(data))
    }
}
