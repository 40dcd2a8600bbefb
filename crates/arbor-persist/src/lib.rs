//! Bundle persistence for Arbor.
//!
//! Persists a tree of content nodes ([`NodeBundle`](arbor_types::NodeBundle))
//! into a document/graph store and rebuilds them on read.
//!
//! # Layout
//!
//! Each workspace owns two document classes:
//!
//! - `<prefix><name>Bundle` -- one document per node, unique on `uuid`, with
//!   child links stored as edges carrying the child's `name` and `uuid`
//! - `<prefix><name>Refs` -- one document per referenced node, unique on
//!   `targetuuid`, listing the referencing properties
//!
//! Binary values of at least `min_blob_size` bytes live in a
//! [`BlobStore`](arbor_store::BlobStore) and are linked from their value.
//!
//! # Modules
//!
//! - [`manager`] -- lifecycle and batch orchestration
//! - [`mapper`] -- bundle documents and the two write phases
//! - [`value_codec`] / [`name_codec`] -- value and name encodings
//! - [`references`] -- the reverse-reference index
//! - [`config`] -- TOML configuration

pub mod config;
pub mod error;
pub mod manager;
pub mod mapper;
pub mod name_codec;
pub mod references;
pub mod value_codec;

pub use config::{ErrorHandling, PersistenceConfig};
pub use error::{PersistError, Result};
pub use manager::{BatchStats, ManagerState, PersistenceManager};
pub use mapper::{BatchIndex, BatchJournal, BundleMapper, ROOT_PARENT_SENTINEL};
pub use references::{ReferenceDelta, ReferenceIndex};
pub use value_codec::ValueCodec;
