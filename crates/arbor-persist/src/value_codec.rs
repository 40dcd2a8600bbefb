//! Encoding of property values as store documents.
//!
//! Every value becomes an embedded document carrying the type code under
//! `type` and the store-native representation under `value`. Binary values
//! additionally record whether they are `embedded`; externalized ones store a
//! blob link and their `length` instead of the bytes.

use std::io;
use std::sync::Arc;

use arbor_store::{BlobId, BlobStore, Document, FieldValue};
use arbor_types::{BinaryValue, NodeId, PropertyType, Value};
use tracing::debug;

use crate::error::{PersistError, Result};
use crate::name_codec;

pub(crate) const TYPE: &str = "type";
pub(crate) const VALUE: &str = "value";
pub(crate) const EMBEDDED: &str = "embedded";
pub(crate) const LENGTH: &str = "length";

fn write_failed(err: impl std::fmt::Display) -> PersistError {
    PersistError::ValueWriteFailed(err.to_string())
}

/// Value encoder/decoder bound to a blob store and threshold.
pub struct ValueCodec<'a> {
    blobs: &'a Arc<dyn BlobStore>,
    min_blob_size: u64,
}

impl<'a> ValueCodec<'a> {
    pub fn new(blobs: &'a Arc<dyn BlobStore>, min_blob_size: u64) -> Self {
        Self {
            blobs,
            min_blob_size,
        }
    }

    /// Encode one value. Blobs written on the way are pushed onto `created`.
    pub fn encode(&self, value: &Value, created: &mut Vec<BlobId>) -> Result<Document> {
        let doc = Document::new().with(TYPE, value.property_type().code());
        let stored: FieldValue = match value {
            Value::Binary(bin) => return self.encode_binary(bin, doc, created),
            Value::Double(v) => (*v).into(),
            Value::Decimal(v) => v.clone().into(),
            Value::Long(v) => (*v).into(),
            Value::Boolean(v) => (*v).into(),
            Value::Name(name) => name_codec::encode(name).into(),
            Value::Date(d) => (*d).into(),
            // Only the target id: the target may not exist before phase 2.
            Value::Reference(id) | Value::WeakReference(id) => id.to_string().into(),
            Value::String(s) | Value::Path(s) | Value::Uri(s) => s.as_str().into(),
        };
        Ok(doc.with(VALUE, stored))
    }

    fn encode_binary(
        &self,
        bin: &BinaryValue,
        mut doc: Document,
        created: &mut Vec<BlobId>,
    ) -> Result<Document> {
        if bin.len() < self.min_blob_size {
            let data = bin.to_bytes().map_err(write_failed)?;
            doc.set(EMBEDDED, true);
            doc.set(VALUE, data);
            return Ok(doc);
        }

        let mut reader = bin.open().map_err(write_failed)?;
        let id = self.blobs.write(&mut reader).map_err(write_failed)?;
        debug!(blob = %id, len = bin.len(), "binary value externalized");
        created.push(id.clone());

        doc.set(EMBEDDED, false);
        doc.set(LENGTH, bin.len() as i64);
        doc.set(VALUE, id);
        Ok(doc)
    }

    /// Decode one value of a property declared as `declared`.
    pub fn decode(&self, doc: &Document, declared: PropertyType) -> Result<Value> {
        let code = doc
            .get_long(TYPE)
            .ok_or_else(|| PersistError::corrupt("value lacks `type`"))?;
        let ty = PropertyType::from_code(code).map_err(|e| PersistError::corrupt(e.to_string()))?;
        if ty != declared {
            return Err(PersistError::corrupt(format!(
                "{ty} value in property declared as {declared}"
            )));
        }
        let field = doc
            .get(VALUE)
            .ok_or_else(|| PersistError::corrupt(format!("{ty} value lacks `value`")))?;
        let mismatch = || PersistError::corrupt(format!("{ty} value has wrong representation"));
        let text = || field.as_str().map(str::to_string).ok_or_else(mismatch);
        let node_id = || {
            let raw = field.as_str().ok_or_else(mismatch)?;
            NodeId::parse(raw).map_err(|e| PersistError::corrupt(e.to_string()))
        };

        Ok(match ty {
            PropertyType::Binary => Value::Binary(self.decode_binary(doc, field)?),
            PropertyType::Double => Value::Double(field.as_double().ok_or_else(mismatch)?),
            PropertyType::Decimal => Value::Decimal(field.as_decimal().ok_or_else(mismatch)?.clone()),
            PropertyType::Long => Value::Long(field.as_long().ok_or_else(mismatch)?),
            PropertyType::Boolean => Value::Boolean(field.as_bool().ok_or_else(mismatch)?),
            PropertyType::Name => {
                Value::Name(name_codec::decode(field.as_document().ok_or_else(mismatch)?)?)
            }
            PropertyType::Date => Value::Date(*field.as_datetime().ok_or_else(mismatch)?),
            PropertyType::Reference => Value::Reference(node_id()?),
            PropertyType::WeakReference => Value::WeakReference(node_id()?),
            PropertyType::String => Value::String(text()?),
            PropertyType::Path => Value::Path(text()?),
            PropertyType::Uri => Value::Uri(text()?),
        })
    }

    fn decode_binary(&self, doc: &Document, field: &FieldValue) -> Result<BinaryValue> {
        let embedded = doc
            .get_bool(EMBEDDED)
            .ok_or_else(|| PersistError::corrupt("binary value lacks `embedded`"))?;
        if embedded {
            let bytes = field
                .as_bytes()
                .ok_or_else(|| PersistError::corrupt("embedded binary lacks bytes"))?;
            return Ok(BinaryValue::from_bytes(bytes.clone()));
        }

        let id = field
            .as_blob()
            .ok_or_else(|| PersistError::corrupt("external binary lacks blob link"))?
            .clone();
        let len = doc
            .get_long(LENGTH)
            .and_then(|l| u64::try_from(l).ok())
            .ok_or_else(|| PersistError::corrupt("external binary lacks `length`"))?;
        if !self.blobs.exists(&id)? {
            return Err(PersistError::corrupt(format!("blob {id} is missing")));
        }

        let blobs = Arc::clone(self.blobs);
        Ok(BinaryValue::from_stream(len, move || {
            blobs.open(&id).map_err(io::Error::other)
        }))
    }
}

/// The blob an encoded value links to, if it was externalized.
pub fn external_blob(doc: &Document) -> Option<&BlobId> {
    let binary = doc.get_long(TYPE) == Some(PropertyType::Binary.code());
    if binary && doc.get_bool(EMBEDDED) == Some(false) {
        doc.get(VALUE).and_then(FieldValue::as_blob)
    } else {
        None
    }
}
