use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::document::{Document, Edge, RecordId};
use crate::error::{StoreError, StoreResult};
use crate::traits::{Connection, ConnectionPool};

/// Default upper bound on concurrently acquired connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 50;

struct ClassDef {
    unique_field: String,
    index: BTreeMap<String, RecordId>,
}

#[derive(Default)]
struct GraphState {
    classes: HashMap<String, ClassDef>,
    records: HashMap<RecordId, Document>,
    edges: HashMap<RecordId, Vec<Edge>>,
}

impl GraphState {
    fn class_def(&self, class: &str) -> StoreResult<&ClassDef> {
        self.classes
            .get(class)
            .ok_or_else(|| StoreError::UnknownClass(class.to_string()))
    }
}

struct Shared {
    state: RwLock<GraphState>,
    next_id: AtomicU64,
    active: AtomicUsize,
    max_connections: usize,
}

/// In-memory, transactional document/graph store.
///
/// Intended for tests and embedding. Committed state lives behind a
/// `RwLock`; every connection buffers its transaction in a private write set
/// that is validated against the unique indexes and applied in one step at
/// commit. The store doubles as its own bounded [`ConnectionPool`].
#[derive(Clone)]
pub struct InMemoryGraphStore {
    shared: Arc<Shared>,
}

impl InMemoryGraphStore {
    /// Create an empty store with the default connection bound.
    pub fn new() -> Self {
        Self::with_max_connections(DEFAULT_MAX_CONNECTIONS)
    }

    /// Create an empty store allowing `max` concurrently acquired connections.
    pub fn with_max_connections(max: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(GraphState::default()),
                next_id: AtomicU64::new(1),
                active: AtomicUsize::new(0),
                max_connections: max.max(1),
            }),
        }
    }

    /// Open a store described by `config`. Only `memory:` URLs are supported.
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        if !config.url.starts_with("memory:") {
            return Err(StoreError::UnsupportedUrl(config.url.clone()));
        }
        debug!(url = %config.url, max_connections = config.max_connections, "opening in-memory store");
        Ok(Self::with_max_connections(config.max_connections))
    }

    /// A connection outside the pool accounting.
    pub fn connect(&self) -> InMemoryConnection {
        InMemoryConnection {
            shared: Arc::clone(&self.shared),
            tx: None,
        }
    }

    /// Number of connections currently acquired from the pool.
    pub fn active_connections(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Number of committed documents.
    pub fn len(&self) -> usize {
        self.shared.state.read().expect("lock poisoned").records.len()
    }

    /// Returns `true` if no document has been committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of committed documents of `class`.
    pub fn count_class(&self, class: &str) -> usize {
        self.shared
            .state
            .read()
            .expect("lock poisoned")
            .records
            .values()
            .filter(|doc| doc.class() == Some(class))
            .count()
    }

    /// Total number of committed edges.
    pub fn edge_count(&self) -> usize {
        self.shared
            .state
            .read()
            .expect("lock poisoned")
            .edges
            .values()
            .map(Vec::len)
            .sum()
    }
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryGraphStore")
            .field("document_count", &self.len())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}

impl ConnectionPool for InMemoryGraphStore {
    fn acquire(&self) -> StoreResult<Box<dyn Connection>> {
        let max = self.shared.max_connections;
        self.shared
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .map_err(|_| StoreError::PoolExhausted { max })?;
        Ok(Box::new(self.connect()))
    }

    fn release(&self, mut conn: Box<dyn Connection>) {
        if conn.in_transaction() {
            if let Err(e) = conn.rollback() {
                warn!(error = %e, "rollback on release failed");
            }
        }
        let _ = self
            .shared
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

/// Uncommitted writes of one transaction. `None` marks a deletion.
#[derive(Default)]
struct WriteSet {
    records: HashMap<RecordId, Option<Document>>,
    edges: HashMap<RecordId, Vec<Edge>>,
}

fn view<'a>(state: &'a GraphState, tx: Option<&'a WriteSet>, id: RecordId) -> Option<&'a Document> {
    if let Some(entry) = tx.and_then(|t| t.records.get(&id)) {
        return entry.as_ref();
    }
    state.records.get(&id)
}

fn edges_view<'a>(state: &'a GraphState, tx: Option<&'a WriteSet>, id: RecordId) -> &'a [Edge] {
    tx.and_then(|t| t.edges.get(&id))
        .or_else(|| state.edges.get(&id))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn overridden(tx: Option<&WriteSet>, id: &RecordId) -> bool {
    tx.is_some_and(|t| t.records.contains_key(id))
}

fn lookup_in(
    state: &GraphState,
    tx: Option<&WriteSet>,
    class: &str,
    key: &str,
) -> StoreResult<Option<RecordId>> {
    let def = state.class_def(class)?;
    if let Some(t) = tx {
        let pending = t.records.iter().find_map(|(id, doc)| {
            let doc = doc.as_ref()?;
            (doc.class() == Some(class) && doc.get_str(&def.unique_field) == Some(key))
                .then_some(*id)
        });
        if pending.is_some() {
            return Ok(pending);
        }
    }
    Ok(def.index.get(key).copied().filter(|id| !overridden(tx, id)))
}

fn unique_key<'d>(state: &GraphState, doc: &'d Document) -> StoreResult<(&'d str, &'d str)> {
    let class = doc
        .class()
        .ok_or_else(|| StoreError::UnknownClass(String::new()))?;
    let def = state.class_def(class)?;
    let key = doc
        .get_str(&def.unique_field)
        .ok_or_else(|| StoreError::MissingKey {
            class: class.to_string(),
            field: def.unique_field.clone(),
        })?;
    Ok((class, key))
}

fn check_key(state: &GraphState, tx: &WriteSet, doc: &Document, id: RecordId) -> StoreResult<()> {
    let (class, key) = unique_key(state, doc)?;
    match lookup_in(state, Some(tx), class, key)? {
        Some(other) if other != id => Err(StoreError::UniqueViolation {
            class: class.to_string(),
            key: key.to_string(),
        }),
        _ => Ok(()),
    }
}

/// A connection to an [`InMemoryGraphStore`].
pub struct InMemoryConnection {
    shared: Arc<Shared>,
    tx: Option<WriteSet>,
}

impl std::fmt::Debug for InMemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryConnection")
            .field("in_transaction", &self.tx.is_some())
            .finish()
    }
}

impl Connection for InMemoryConnection {
    fn begin(&mut self) -> StoreResult<()> {
        if self.tx.is_some() {
            return Err(StoreError::TransactionActive);
        }
        self.tx = Some(WriteSet::default());
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<()> {
        let tx = self.tx.take().ok_or(StoreError::NoTransaction)?;
        let mut guard = self.shared.state.write().expect("lock poisoned");
        let state = &mut *guard;

        // Validate every pending key before touching committed state.
        let mut seen = HashSet::new();
        for (id, doc) in &tx.records {
            let Some(doc) = doc else { continue };
            let (class, key) = unique_key(state, doc)?;
            let clash = !seen.insert((class, key))
                || state.classes[class]
                    .index
                    .get(key)
                    .is_some_and(|existing| existing != id && !tx.records.contains_key(existing));
            if clash {
                return Err(StoreError::UniqueViolation {
                    class: class.to_string(),
                    key: key.to_string(),
                });
            }
        }

        let record_count = tx.records.len();
        let mut deleted = HashSet::new();
        for (id, change) in tx.records {
            if let Some(old) = state.records.remove(&id) {
                if let Some(class) = old.class() {
                    if let Some(def) = state.classes.get_mut(class) {
                        if let Some(key) = old.get_str(&def.unique_field) {
                            if def.index.get(key) == Some(&id) {
                                def.index.remove(key);
                            }
                        }
                    }
                }
            }
            match change {
                Some(doc) => {
                    if let Some(def) = doc.class().and_then(|c| state.classes.get_mut(c)) {
                        if let Some(key) = doc.get_str(&def.unique_field) {
                            def.index.insert(key.to_string(), id);
                        }
                    }
                    state.records.insert(id, doc);
                }
                None => {
                    state.edges.remove(&id);
                    deleted.insert(id);
                }
            }
        }

        for (id, list) in tx.edges {
            if deleted.contains(&id) || list.is_empty() {
                state.edges.remove(&id);
            } else {
                state.edges.insert(id, list);
            }
        }
        if !deleted.is_empty() {
            for list in state.edges.values_mut() {
                list.retain(|edge| !deleted.contains(&edge.target));
            }
        }

        debug!(records = record_count, deleted = deleted.len(), "transaction committed");
        Ok(())
    }

    fn rollback(&mut self) -> StoreResult<()> {
        let tx = self.tx.take().ok_or(StoreError::NoTransaction)?;
        debug!(records = tx.records.len(), "transaction rolled back");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    fn ensure_class(&mut self, class: &str, unique_field: &str) -> StoreResult<bool> {
        let mut state = self.shared.state.write().expect("lock poisoned");
        if state.classes.contains_key(class) {
            return Ok(false);
        }
        state.classes.insert(
            class.to_string(),
            ClassDef {
                unique_field: unique_field.to_string(),
                index: BTreeMap::new(),
            },
        );
        debug!(class, unique_field, "class created");
        Ok(true)
    }

    fn create(&mut self, doc: Document) -> StoreResult<RecordId> {
        let tx = self.tx.as_mut().ok_or(StoreError::NoTransaction)?;
        let state = self.shared.state.read().expect("lock poisoned");
        let id = RecordId::new(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        check_key(&state, tx, &doc, id)?;
        tx.records.insert(id, Some(doc));
        Ok(id)
    }

    fn update(&mut self, id: RecordId, doc: Document) -> StoreResult<()> {
        let tx = self.tx.as_mut().ok_or(StoreError::NoTransaction)?;
        let state = self.shared.state.read().expect("lock poisoned");
        if view(&state, Some(&*tx), id).is_none() {
            return Err(StoreError::NotFound(id));
        }
        check_key(&state, tx, &doc, id)?;
        tx.records.insert(id, Some(doc));
        Ok(())
    }

    fn load(&self, id: RecordId) -> StoreResult<Option<Document>> {
        let state = self.shared.state.read().expect("lock poisoned");
        Ok(view(&state, self.tx.as_ref(), id).cloned())
    }

    fn delete(&mut self, id: RecordId) -> StoreResult<bool> {
        let tx = self.tx.as_mut().ok_or(StoreError::NoTransaction)?;
        let state = self.shared.state.read().expect("lock poisoned");
        if view(&state, Some(&*tx), id).is_none() {
            return Ok(false);
        }
        tx.records.insert(id, None);
        tx.edges.insert(id, Vec::new());
        Ok(true)
    }

    fn lookup(&self, class: &str, key: &str) -> StoreResult<Option<RecordId>> {
        let state = self.shared.state.read().expect("lock poisoned");
        lookup_in(&state, self.tx.as_ref(), class, key)
    }

    fn scan_keys(&self, class: &str, after: Option<&str>, limit: usize) -> StoreResult<Vec<String>> {
        let state = self.shared.state.read().expect("lock poisoned");
        let tx = self.tx.as_ref();
        let def = state.class_def(class)?;
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);

        let mut keys: BTreeSet<&str> = def
            .index
            .range::<str, _>((lower, Bound::Unbounded))
            .filter(|(_, id)| !overridden(tx, id))
            .map(|(key, _)| key.as_str())
            .collect();
        if let Some(t) = tx {
            keys.extend(
                t.records
                    .values()
                    .flatten()
                    .filter(|doc| doc.class() == Some(class))
                    .filter_map(|doc| doc.get_str(&def.unique_field))
                    .filter(|key| after.map_or(true, |a| *key > a)),
            );
        }

        let keys = keys.into_iter().map(str::to_string);
        Ok(if limit == 0 {
            keys.collect()
        } else {
            keys.take(limit).collect()
        })
    }

    fn create_edge(&mut self, from: RecordId, edge: Edge) -> StoreResult<()> {
        let tx = self.tx.as_mut().ok_or(StoreError::NoTransaction)?;
        let state = self.shared.state.read().expect("lock poisoned");
        for id in [from, edge.target] {
            if view(&state, Some(&*tx), id).is_none() {
                return Err(StoreError::NotFound(id));
            }
        }
        let mut list = edges_view(&state, Some(&*tx), from).to_vec();
        list.push(edge);
        tx.edges.insert(from, list);
        Ok(())
    }

    fn out_edges(&self, from: RecordId) -> StoreResult<Vec<Edge>> {
        let state = self.shared.state.read().expect("lock poisoned");
        let tx = self.tx.as_ref();
        Ok(edges_view(&state, tx, from)
            .iter()
            .filter(|edge| view(&state, tx, edge.target).is_some())
            .cloned()
            .collect())
    }

    fn clear_out_edges(&mut self, from: RecordId) -> StoreResult<usize> {
        let tx = self.tx.as_mut().ok_or(StoreError::NoTransaction)?;
        let state = self.shared.state.read().expect("lock poisoned");
        let count = edges_view(&state, Some(&*tx), from).len();
        tx.edges.insert(from, Vec::new());
        Ok(count)
    }
}
