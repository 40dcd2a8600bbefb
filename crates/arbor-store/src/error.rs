use crate::blob::BlobId;
use crate::document::RecordId;

/// Errors from document store and blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested record was not found.
    #[error("record not found: {0}")]
    NotFound(RecordId),

    /// The document class has not been defined.
    #[error("unknown document class: {0}")]
    UnknownClass(String),

    /// A document lacks the string field its class is unique-indexed on.
    #[error("document of class {class} lacks unique key field {field}")]
    MissingKey { class: String, field: String },

    /// A second document would carry an already indexed key.
    #[error("unique index violation in {class}: key {key} already present")]
    UniqueViolation { class: String, key: String },

    /// A write or commit was attempted outside a transaction.
    #[error("no active transaction")]
    NoTransaction,

    /// `begin` was called while a transaction is already open.
    #[error("transaction already active")]
    TransactionActive,

    /// Every pooled connection is in use.
    #[error("connection pool exhausted ({max} connections)")]
    PoolExhausted { max: usize },

    /// The store URL names a backend this build cannot open.
    #[error("unsupported store url: {0}")]
    UnsupportedUrl(String),

    /// The requested blob does not exist.
    #[error("blob not found: {0}")]
    BlobNotFound(BlobId),

    /// A blob identifier that cannot name a blob.
    #[error("invalid blob id: {0:?}")]
    InvalidBlobId(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
