use crate::document::{Document, Edge, RecordId};
use crate::error::StoreResult;

/// A connection to a document/graph store.
///
/// All implementations must satisfy these invariants:
/// - Writes (`create`, `update`, `delete`, edge changes) are only accepted
///   inside a transaction opened with `begin`.
/// - Reads on a connection see its own uncommitted writes; other
///   connections see them only after `commit`.
/// - `commit` applies the whole write set or nothing; `rollback` discards it.
/// - Each class has at most one unique-indexed string field; at most one
///   committed document per class carries a given key.
/// - Schema operations (`ensure_class`) take effect immediately, inside or
///   outside a transaction.
pub trait Connection: Send {
    /// Open a transaction.
    fn begin(&mut self) -> StoreResult<()>;

    /// Apply the transaction's writes atomically.
    fn commit(&mut self) -> StoreResult<()>;

    /// Discard the transaction's writes.
    fn rollback(&mut self) -> StoreResult<()>;

    /// Returns `true` while a transaction is open.
    fn in_transaction(&self) -> bool;

    /// Define `class` with a unique index on `unique_field`.
    ///
    /// Returns `true` if the class was created, `false` if it already existed.
    fn ensure_class(&mut self, class: &str, unique_field: &str) -> StoreResult<bool>;

    /// Persist a new document under its class and return its identity.
    fn create(&mut self, doc: Document) -> StoreResult<RecordId>;

    /// Replace the fields of an existing document.
    fn update(&mut self, id: RecordId, doc: Document) -> StoreResult<()>;

    /// Load a document. Returns `Ok(None)` if it does not exist.
    fn load(&self, id: RecordId) -> StoreResult<Option<Document>>;

    /// Delete a document together with its incoming and outgoing edges.
    ///
    /// Returns `true` if the document existed.
    fn delete(&mut self, id: RecordId) -> StoreResult<bool>;

    /// Look up a document by its unique key.
    fn lookup(&self, class: &str, key: &str) -> StoreResult<Option<RecordId>>;

    /// Unique keys of `class` in ascending order, strictly greater than
    /// `after` when given, at most `limit` of them (`0` means unbounded).
    fn scan_keys(&self, class: &str, after: Option<&str>, limit: usize) -> StoreResult<Vec<String>>;

    /// Append an outgoing edge to `from`.
    fn create_edge(&mut self, from: RecordId, edge: Edge) -> StoreResult<()>;

    /// Outgoing edges of `from`, in creation order.
    fn out_edges(&self, from: RecordId) -> StoreResult<Vec<Edge>>;

    /// Remove every outgoing edge of `from`, returning how many there were.
    fn clear_out_edges(&mut self, from: RecordId) -> StoreResult<usize>;
}

/// A bounded source of store connections.
///
/// Every connection handed out by `acquire` must be returned through
/// `release`, on success and failure paths alike.
pub trait ConnectionPool: Send + Sync {
    /// Take a connection from the pool.
    fn acquire(&self) -> StoreResult<Box<dyn Connection>>;

    /// Return a connection to the pool. An open transaction is rolled back.
    fn release(&self, conn: Box<dyn Connection>);
}
