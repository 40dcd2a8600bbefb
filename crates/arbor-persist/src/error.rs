//! Error types for bundle persistence.

use arbor_store::StoreError;
use arbor_types::{NodeId, TypeError};
use thiserror::Error;

/// Errors that can occur while persisting or loading bundles.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The manager has not been initialized.
    #[error("persistence manager is not initialized")]
    NotInitialized,

    /// `init` was called on an initialized manager.
    #[error("persistence manager is already initialized")]
    AlreadyInitialized,

    /// The manager has been closed and cannot be used again.
    #[error("persistence manager is closed")]
    Closed,

    /// A stored field is missing or malformed.
    #[error("corrupt stored value: {0}")]
    CorruptValue(String),

    /// Streaming a value into the store failed.
    #[error("failed to write value: {0}")]
    ValueWriteFailed(String),

    /// A bundle violates the property invariants.
    #[error("invalid bundle: {0}")]
    InvalidBundle(#[from] TypeError),

    /// Writing or destroying one bundle failed.
    #[error("failed to write bundle {id}: {source}")]
    BundleWriteFailed {
        id: NodeId,
        #[source]
        source: Box<PersistError>,
    },

    /// A modified or deleted bundle has no stored document.
    #[error("bundle not found: {0}")]
    BundleNotFound(NodeId),

    /// A child listed by a parent is neither in the batch nor in the store.
    #[error("bundle {parent} lists child {child} which does not exist")]
    DanglingChildReference { parent: NodeId, child: NodeId },

    /// The batch was rolled back.
    #[error("batch persist failed: {0}")]
    BatchPersistFailed(#[source] Box<PersistError>),

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Error from the backing store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl PersistError {
    pub(crate) fn bundle(id: NodeId, source: PersistError) -> Self {
        Self::BundleWriteFailed {
            id,
            source: Box::new(source),
        }
    }

    pub(crate) fn corrupt(what: impl Into<String>) -> Self {
        Self::CorruptValue(what.into())
    }

    /// The innermost cause, looking through batch and bundle wrappers.
    pub fn root_cause(&self) -> &PersistError {
        match self {
            Self::BatchPersistFailed(inner) | Self::BundleWriteFailed { source: inner, .. } => {
                inner.root_cause()
            }
            other => other,
        }
    }
}

/// Convenience type alias for persistence operations.
pub type Result<T> = std::result::Result<T, PersistError>;
