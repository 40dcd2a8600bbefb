//! The persistence manager: lifecycle, batch orchestration and reads.
//!
//! [`PersistenceManager::store_batch`] runs one store transaction per batch:
//! phase 1 writes every bundle document, phase 2 links children, deletes
//! follow, and phase 3 applies the queued reference deltas before commit.
//! Blobs created by a failed batch are deleted on rollback; blobs released
//! by a committed batch are deleted after commit.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, RwLock};

use arbor_store::{
    BlobId, BlobStore, Connection, ConnectionPool, InMemoryBlobStore, InMemoryGraphStore,
};
use arbor_types::{NodeBundle, NodeId, ReferenceRecord};
use tracing::{debug, error, info, warn};

use crate::config::{ErrorHandling, PersistenceConfig};
use crate::error::{PersistError, Result};
use crate::mapper::{self, BatchIndex, BatchJournal, BundleMapper};
use crate::references::{self, ReferenceIndex};
use crate::value_codec::ValueCodec;

/// Lifecycle of a [`PersistenceManager`]. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized,
    Initialized,
    Closed,
}

/// Counters of one committed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Bundles written in phase 1.
    pub written: usize,
    /// Child edges written in phase 2.
    pub edges: usize,
    /// Bundles deleted.
    pub destroyed: usize,
    /// Reference records touched in phase 3.
    pub references: usize,
    /// Bundles skipped in best-effort mode.
    pub skipped: usize,
}

/// A pooled connection, rolled back and returned to its pool on drop.
struct PooledConnection<'p> {
    pool: &'p dyn ConnectionPool,
    conn: Option<Box<dyn Connection>>,
}

impl Deref for PooledConnection<'_> {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_deref().expect("connection held until drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_deref_mut().expect("connection held until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if conn.in_transaction() {
                if let Err(e) = conn.rollback() {
                    warn!(error = %e, "rollback of abandoned transaction failed");
                }
            }
            self.pool.release(conn);
        }
    }
}

/// Persists node bundles and the reverse-reference index.
///
/// Bundles are written in batches. Each batch runs in one store transaction:
///
/// 1. every modified bundle's document is written and indexed by id;
/// 2. child edges are written for every indexed bundle, resolving children
///    through the batch index or the store;
/// 3. deleted bundles are removed;
/// 4. queued reference changes are applied to the reference index.
///
/// A failing batch is rolled back entirely and the blobs it wrote are
/// deleted. Blobs released by a committed batch are deleted after commit.
///
/// The manager is `Send + Sync`; batches on different threads only contend
/// while acquiring their connection.
pub struct PersistenceManager {
    config: PersistenceConfig,
    bundle_class: String,
    refs_class: String,
    pool: Arc<dyn ConnectionPool>,
    blobs: Arc<dyn BlobStore>,
    state: RwLock<ManagerState>,
    acquire_lock: Mutex<()>,
}

impl PersistenceManager {
    pub fn new(
        config: PersistenceConfig,
        pool: Arc<dyn ConnectionPool>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            bundle_class: config.bundle_class(),
            refs_class: config.refs_class(),
            config,
            pool,
            blobs,
            state: RwLock::new(ManagerState::Uninitialized),
            acquire_lock: Mutex::new(()),
        }
    }

    /// A manager over a fresh in-memory store and blob store.
    pub fn in_memory(config: PersistenceConfig) -> Result<Self> {
        let store = InMemoryGraphStore::open(&config.store_config())?;
        Ok(Self::new(
            config,
            Arc::new(store),
            Arc::new(InMemoryBlobStore::new()),
        ))
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    pub fn state(&self) -> ManagerState {
        *self.state.read().expect("lock poisoned")
    }

    /// Create the bundle and reference classes if they do not exist yet.
    pub fn init(&self) -> Result<()> {
        let mut state = self.state.write().expect("lock poisoned");
        match *state {
            ManagerState::Initialized => return Err(PersistError::AlreadyInitialized),
            ManagerState::Closed => return Err(PersistError::Closed),
            ManagerState::Uninitialized => {}
        }

        let mut conn = self.connection()?;
        let bundles_created = conn.ensure_class(&self.bundle_class, mapper::UUID)?;
        let refs_created = conn.ensure_class(&self.refs_class, references::TARGET)?;
        drop(conn);

        *state = ManagerState::Initialized;
        info!(
            bundle_class = %self.bundle_class,
            refs_class = %self.refs_class,
            bundles_created,
            refs_created,
            "persistence manager initialized"
        );
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        let mut state = self.state.write().expect("lock poisoned");
        if *state != ManagerState::Initialized {
            return Err(PersistError::NotInitialized);
        }
        *state = ManagerState::Closed;
        info!(bundle_class = %self.bundle_class, "persistence manager closed");
        Ok(())
    }

    /// Write `modified` bundles and delete `deleted` ones in one transaction.
    pub fn store_batch(&self, modified: &[NodeBundle], deleted: &[NodeBundle]) -> Result<BatchStats> {
        self.ensure_initialized()?;
        debug!(modified = modified.len(), deleted = deleted.len(), "storing batch");

        let mut journal = BatchJournal::default();
        let result = self.begin().and_then(|mut conn| {
            let stats = self.run_batch(&mut *conn, modified, deleted, &mut journal)?;
            conn.commit()?;
            Ok(stats)
        });

        match result {
            Ok(stats) => {
                info!(
                    written = stats.written,
                    edges = stats.edges,
                    destroyed = stats.destroyed,
                    references = stats.references,
                    skipped = stats.skipped,
                    "batch committed"
                );
                self.discard_blobs(&journal.orphaned_blobs, "orphaned by batch");
                Ok(stats)
            }
            Err(e) => {
                error!(error = %e, "batch rolled back");
                self.discard_blobs(&journal.created_blobs, "written by rolled back batch");
                Err(PersistError::BatchPersistFailed(Box::new(e)))
            }
        }
    }

    fn run_batch(
        &self,
        conn: &mut dyn Connection,
        modified: &[NodeBundle],
        deleted: &[NodeBundle],
        journal: &mut BatchJournal,
    ) -> Result<BatchStats> {
        let mapper = self.mapper();
        let mut stats = BatchStats::default();
        let mut index = BatchIndex::with_capacity(modified.len());

        for bundle in modified {
            let mut local = BatchJournal::default();
            match mapper.write_phase1(conn, bundle, &mut local) {
                Ok(rid) => {
                    index.insert(bundle.id, rid);
                    journal.absorb(local);
                    stats.written += 1;
                }
                Err(e) => self.skip_or_fail(bundle.id, "store", e, local, journal, &mut stats)?,
            }
        }

        for bundle in modified {
            if let Some(&rid) = index.get(&bundle.id) {
                stats.edges += mapper.write_phase2(conn, bundle, rid, &index)?;
            }
        }

        for bundle in deleted {
            let mut local = BatchJournal::default();
            match mapper.destroy(conn, bundle.id, &mut local) {
                Ok(()) => {
                    journal.absorb(local);
                    stats.destroyed += 1;
                }
                Err(e) => self.skip_or_fail(bundle.id, "destroy", e, local, journal, &mut stats)?,
            }
        }

        stats.references = self.references().apply(conn, &journal.reference_deltas)?;
        Ok(stats)
    }

    fn skip_or_fail(
        &self,
        id: NodeId,
        op: &'static str,
        err: PersistError,
        local: BatchJournal,
        journal: &mut BatchJournal,
        stats: &mut BatchStats,
    ) -> Result<()> {
        match self.config.error_handling {
            ErrorHandling::FailFast => {
                journal.absorb(local);
                Err(err)
            }
            ErrorHandling::BestEffort => {
                warn!(node = %id, op, error = %err, "skipping bundle");
                self.discard_blobs(&local.created_blobs, "written for skipped bundle");
                stats.skipped += 1;
                Ok(())
            }
        }
    }

    /// Load a bundle with its child links. Returns `Ok(None)` if not stored.
    pub fn load_bundle(&self, id: NodeId) -> Result<Option<NodeBundle>> {
        self.ensure_initialized()?;
        let conn = self.connection()?;
        let Some(rid) = conn.lookup(&self.bundle_class, &id.to_string())? else {
            return Ok(None);
        };
        let Some(doc) = conn.load(rid)? else {
            return Ok(None);
        };
        self.mapper().read(&*conn, rid, &doc).map(Some)
    }

    pub fn load_references(&self, target: NodeId) -> Result<Option<ReferenceRecord>> {
        self.ensure_initialized()?;
        let conn = self.connection()?;
        self.references().load(&*conn, target)
    }

    /// Replace the reference record of `record.target`. An empty record
    /// deletes it.
    pub fn store_references(&self, record: &ReferenceRecord) -> Result<()> {
        self.ensure_initialized()?;
        let mut conn = self.begin()?;
        self.references().store(&mut *conn, record)?;
        conn.commit()?;
        Ok(())
    }

    /// Delete the reference record of `target`. Returns `true` if one existed.
    pub fn delete_references(&self, target: NodeId) -> Result<bool> {
        self.ensure_initialized()?;
        let mut conn = self.begin()?;
        let existed = self.references().delete(&mut *conn, target)?;
        conn.commit()?;
        Ok(existed)
    }

    pub fn references_exist(&self, target: NodeId) -> Result<bool> {
        self.ensure_initialized()?;
        let conn = self.connection()?;
        self.references().exists(&*conn, target)
    }

    /// Stored node ids in ascending order, strictly after `after` when
    /// given, at most `max_count` of them (`0` for all).
    pub fn list_node_ids(&self, after: Option<NodeId>, max_count: usize) -> Result<Vec<NodeId>> {
        self.ensure_initialized()?;
        let conn = self.connection()?;
        let after = after.map(|id| id.to_string());
        conn.scan_keys(&self.bundle_class, after.as_deref(), max_count)?
            .iter()
            .map(|key| NodeId::parse(key).map_err(|e| PersistError::corrupt(e.to_string())))
            .collect()
    }

    fn ensure_initialized(&self) -> Result<()> {
        match self.state() {
            ManagerState::Initialized => Ok(()),
            _ => Err(PersistError::NotInitialized),
        }
    }

    fn connection(&self) -> Result<PooledConnection<'_>> {
        let conn = self.pool.acquire()?;
        Ok(PooledConnection {
            pool: self.pool.as_ref(),
            conn: Some(conn),
        })
    }

    /// A connection with an open transaction.
    fn begin(&self) -> Result<PooledConnection<'_>> {
        let _guard = self.acquire_lock.lock().expect("lock poisoned");
        let mut conn = self.connection()?;
        conn.begin()?;
        Ok(conn)
    }

    fn mapper(&self) -> BundleMapper<'_> {
        BundleMapper::new(
            &self.bundle_class,
            ValueCodec::new(&self.blobs, self.config.min_blob_size),
        )
    }

    fn references(&self) -> ReferenceIndex<'_> {
        ReferenceIndex::new(&self.refs_class)
    }

    fn discard_blobs(&self, ids: &[BlobId], reason: &'static str) {
        if ids.is_empty() {
            return;
        }
        for id in ids {
            if let Err(e) = self.blobs.delete(id) {
                warn!(blob = %id, reason, error = %e, "failed to delete blob");
            }
        }
        debug!(count = ids.len(), reason, "blobs deleted");
    }
}

impl std::fmt::Debug for PersistenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceManager")
            .field("bundle_class", &self.bundle_class)
            .field("refs_class", &self.refs_class)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_types::{PropertyEntry, PropertyId, QName, Value};

    fn manager() -> PersistenceManager {
        let m = PersistenceManager::in_memory(PersistenceConfig::default()).unwrap();
        m.init().unwrap();
        m
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[test]
    fn state_machine() {
        let m = PersistenceManager::in_memory(PersistenceConfig::default()).unwrap();
        assert_eq!(m.state(), ManagerState::Uninitialized);
        assert!(matches!(m.close(), Err(PersistError::NotInitialized)));
        assert!(matches!(
            m.load_bundle(NodeId::random()),
            Err(PersistError::NotInitialized)
        ));

        m.init().unwrap();
        assert!(matches!(m.init(), Err(PersistError::AlreadyInitialized)));
        m.close().unwrap();
        assert_eq!(m.state(), ManagerState::Closed);

        assert!(matches!(m.init(), Err(PersistError::Closed)));
        assert!(matches!(m.close(), Err(PersistError::NotInitialized)));
        assert!(matches!(
            m.store_batch(&[], &[]),
            Err(PersistError::NotInitialized)
        ));
        assert!(matches!(
            m.references_exist(NodeId::random()),
            Err(PersistError::NotInitialized)
        ));
    }

    #[test]
    fn unsupported_url_is_rejected() {
        let config = PersistenceConfig {
            url: "remote:localhost/jcr".into(),
            ..PersistenceConfig::default()
        };
        assert!(matches!(
            PersistenceManager::in_memory(config),
            Err(PersistError::Store(_))
        ));
    }

    #[test]
    fn manager_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PersistenceManager>();
    }

    // -----------------------------------------------------------------------
    // Batches
    // -----------------------------------------------------------------------

    #[test]
    fn empty_batch_commits() {
        let m = manager();
        assert_eq!(m.store_batch(&[], &[]).unwrap(), BatchStats::default());
    }

    #[test]
    fn stats_count_each_phase() {
        let m = manager();
        let target = NodeBundle::new(NodeId::random(), QName::local("file"));
        let mut root = NodeBundle::new(NodeId::random(), QName::local("root"));
        root.add_child(QName::local("f"), target.id);
        root.set_property(PropertyEntry::single(
            QName::local("link"),
            Value::Reference(target.id),
        ));
        let target = target.with_parent(root.id);

        let stats = m.store_batch(&[root.clone(), target.clone()], &[]).unwrap();
        assert_eq!(
            stats,
            BatchStats {
                written: 2,
                edges: 1,
                destroyed: 0,
                references: 1,
                skipped: 0,
            }
        );
        let record = m.load_references(target.id).unwrap().unwrap();
        assert!(record.contains(&PropertyId::new(root.id, QName::local("link"))));
    }

    #[test]
    fn references_pass_through() {
        let m = manager();
        let target = NodeId::random();
        let record = ReferenceRecord::with_references(
            target,
            [PropertyId::new(NodeId::random(), QName::local("r"))],
        );
        m.store_references(&record).unwrap();
        assert!(m.references_exist(target).unwrap());
        assert_eq!(m.load_references(target).unwrap(), Some(record));
        assert!(m.delete_references(target).unwrap());
        assert!(!m.references_exist(target).unwrap());
        assert_eq!(m.load_references(target).unwrap(), None);
    }
}
