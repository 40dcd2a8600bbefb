//! Document/graph storage backend for Arbor.
//!
//! This crate provides the storage primitives the persistence layer is
//! written against: schemaless documents grouped into classes, a unique
//! string index per class, directed edges carrying attributes, and
//! out-of-line blob storage.
//!
//! # Traits
//!
//! - [`Connection`] -- one transactional session against a store
//! - [`ConnectionPool`] -- bounded source of connections
//! - [`BlobStore`] -- immutable blobs addressed by [`BlobId`]
//!
//! # Backends
//!
//! - [`InMemoryGraphStore`] -- `RwLock`-guarded graph for tests and embedding
//! - [`InMemoryBlobStore`] -- `HashMap`-based blob store
//! - [`FsBlobStore`] -- one file per blob under a sharded directory
//!
//! # Design Rules
//!
//! 1. Writes happen inside a transaction; commit is all-or-nothing.
//! 2. A connection reads its own uncommitted writes.
//! 3. Unique keys are checked when written and again at commit.
//! 4. Deleting a document removes every edge touching it.
//! 5. Blobs are never rewritten in place; every write yields a new id.

pub mod blob;
pub mod config;
pub mod document;
pub mod error;
pub mod fs;
pub mod memory;
pub mod traits;

pub use blob::{BlobId, BlobStore, InMemoryBlobStore};
#[cfg(any(test, feature = "test-utils"))]
pub use blob::FailingReader;
pub use config::StoreConfig;
pub use document::{Document, Edge, FieldValue, RecordId};
pub use error::{StoreError, StoreResult};
pub use fs::FsBlobStore;
pub use memory::{InMemoryConnection, InMemoryGraphStore, DEFAULT_MAX_CONNECTIONS};
pub use traits::{Connection, ConnectionPool};
