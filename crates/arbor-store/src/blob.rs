use std::collections::HashMap;
use std::fmt;
use std::io::{self, Cursor, Read};
use std::sync::RwLock;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// Identifier of an out-of-line blob.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobId(String);

impl BlobId {
    /// A fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({})", self.0)
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage for large binary values kept outside their documents.
///
/// Blobs are immutable: a write always produces a new identifier.
pub trait BlobStore: Send + Sync {
    /// Drain `data` into a new blob and return its identifier.
    fn write(&self, data: &mut dyn Read) -> StoreResult<BlobId>;

    /// Open a blob for reading.
    fn open(&self, id: &BlobId) -> StoreResult<Box<dyn Read + Send>>;

    /// Delete a blob. Deleting a missing blob is [`StoreError::BlobNotFound`].
    fn delete(&self, id: &BlobId) -> StoreResult<()>;

    /// Check whether a blob exists.
    fn exists(&self, id: &BlobId) -> StoreResult<bool>;

    /// Read a whole blob into memory.
    fn read_all(&self, id: &BlobId) -> StoreResult<Bytes> {
        let mut buf = Vec::new();
        self.open(id)?.read_to_end(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}

/// `HashMap`-backed blob store for tests and embedding.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<BlobId, Bytes>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identifiers of every stored blob, sorted.
    pub fn ids(&self) -> Vec<BlobId> {
        let mut ids: Vec<_> = self
            .blobs
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryBlobStore")
            .field("blob_count", &self.len())
            .finish()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn write(&self, data: &mut dyn Read) -> StoreResult<BlobId> {
        let mut buf = Vec::new();
        data.read_to_end(&mut buf)?;
        let id = BlobId::generate();
        self.blobs
            .write()
            .expect("lock poisoned")
            .insert(id.clone(), Bytes::from(buf));
        Ok(id)
    }

    fn open(&self, id: &BlobId) -> StoreResult<Box<dyn Read + Send>> {
        let data = self
            .blobs
            .read()
            .expect("lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::BlobNotFound(id.clone()))?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn delete(&self, id: &BlobId) -> StoreResult<()> {
        self.blobs
            .write()
            .expect("lock poisoned")
            .remove(id)
            .map(drop)
            .ok_or_else(|| StoreError::BlobNotFound(id.clone()))
    }

    fn exists(&self, id: &BlobId) -> StoreResult<bool> {
        Ok(self.blobs.read().expect("lock poisoned").contains_key(id))
    }
}

/// A reader that fails after yielding `ok_bytes` bytes.
#[cfg(any(test, feature = "test-utils"))]
pub struct FailingReader {
    pub ok_bytes: usize,
}

#[cfg(any(test, feature = "test-utils"))]
impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.ok_bytes == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "stream failed"));
        }
        let n = buf.len().min(self.ok_bytes);
        buf[..n].fill(0xAB);
        self.ok_bytes -= n;
        Ok(n)
    }
}
