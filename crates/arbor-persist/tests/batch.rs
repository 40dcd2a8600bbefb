//! End-to-end batch behaviour of the persistence manager.

use std::io::Read;
use std::str::FromStr;
use std::sync::Arc;

use arbor_persist::{
    BatchStats, ErrorHandling, PersistError, PersistenceConfig, PersistenceManager,
};
use arbor_store::{BlobStore, FailingReader, FsBlobStore, InMemoryBlobStore, InMemoryGraphStore};
use arbor_types::{
    BinaryValue, NodeBundle, NodeId, PropertyEntry, PropertyId, PropertyType, QName,
    ReferenceRecord, Value,
};
use bigdecimal::BigDecimal;
use chrono::DateTime;

const THRESHOLD: u64 = 64;

struct Harness {
    store: InMemoryGraphStore,
    blobs: Arc<InMemoryBlobStore>,
    manager: PersistenceManager,
}

fn harness_with(config: PersistenceConfig, max_connections: usize) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let store = InMemoryGraphStore::with_max_connections(max_connections);
    let blobs = Arc::new(InMemoryBlobStore::new());
    let manager = PersistenceManager::new(config, Arc::new(store.clone()), blobs.clone());
    manager.init().unwrap();
    Harness {
        store,
        blobs,
        manager,
    }
}

fn harness() -> Harness {
    harness_with(config(ErrorHandling::FailFast), 8)
}

fn config(error_handling: ErrorHandling) -> PersistenceConfig {
    PersistenceConfig {
        min_blob_size: THRESHOLD,
        error_handling,
        ..PersistenceConfig::default()
    }
}

fn nt(local: &str) -> QName {
    QName::new("http://www.jcp.org/jcr/nt/1.0", local)
}

fn name(local: &str) -> QName {
    QName::new("http://example.com/app", local)
}

fn failing_binary() -> Value {
    Value::Binary(BinaryValue::from_stream(THRESHOLD * 4, || {
        Ok(Box::new(FailingReader { ok_bytes: 8 }) as Box<dyn Read + Send>)
    }))
}

// ---------------------------------------------------------------------------
// Round trips
// ---------------------------------------------------------------------------

#[test]
fn every_value_variant_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::open(dir.path()).unwrap());
    let manager = PersistenceManager::new(
        config(ErrorHandling::FailFast),
        Arc::new(InMemoryGraphStore::new()),
        blobs,
    );
    manager.init().unwrap();

    let target = NodeBundle::new(NodeId::random(), nt("file"));
    let mut bundle = NodeBundle::new(NodeId::random(), nt("unstructured"));
    bundle.mod_count = 3;
    bundle.add_mixin(name("tagged"));
    bundle.add_mixin(QName::new("http://www.jcp.org/jcr/mix/1.0", "referenceable"));
    bundle.add_shared(NodeId::random());
    bundle.add_child(name("target"), target.id);
    let props = [
        PropertyEntry::single(name("small"), Value::binary(vec![1u8; 10])),
        PropertyEntry::single(name("large"), Value::binary(vec![2u8; 1000])),
        PropertyEntry::single(name("double"), Value::Double(2.5)),
        PropertyEntry::single(
            name("decimal"),
            Value::Decimal(BigDecimal::from_str("3.14159265358979323846264338327950288").unwrap()),
        ),
        PropertyEntry::single(name("long"), Value::Long(-42)),
        PropertyEntry::single(name("bool"), Value::Boolean(false)),
        PropertyEntry::single(name("qname"), Value::Name(nt("folder"))),
        PropertyEntry::single(
            name("date"),
            Value::Date(DateTime::parse_from_rfc3339("2010-10-18T09:15:00+02:00").unwrap()),
        ),
        PropertyEntry::single(name("ref"), Value::Reference(target.id)),
        PropertyEntry::single(name("weak"), Value::WeakReference(target.id)),
        PropertyEntry::single(name("path"), Value::Path("/content/a".into())),
        PropertyEntry::single(name("uri"), Value::Uri("urn:example:1".into())),
        PropertyEntry::multi(
            name("tags"),
            PropertyType::String,
            vec![Value::String("b".into()), Value::String("a".into())],
        ),
        PropertyEntry::multi(name("none"), PropertyType::Long, vec![]),
    ];
    for p in props {
        bundle.set_property(p);
    }
    let target = target.with_parent(bundle.id);

    manager
        .store_batch(&[bundle.clone(), target.clone()], &[])
        .unwrap();

    let back = manager.load_bundle(bundle.id).unwrap().unwrap();
    assert_eq!(back, bundle);
    let Value::Binary(large) = &back.properties[&name("large")].values[0] else {
        panic!("not binary");
    };
    assert!(large.as_bytes().is_none());
    assert_eq!(manager.load_bundle(target.id).unwrap().unwrap(), target);
}

#[test]
fn threshold_boundary_through_manager() {
    let h = harness();
    let mut bundle = NodeBundle::new(NodeId::random(), nt("file"));
    let below = vec![7u8; THRESHOLD as usize - 1];
    let at = vec![8u8; THRESHOLD as usize];
    bundle.set_property(PropertyEntry::single(name("below"), Value::binary(below.clone())));
    bundle.set_property(PropertyEntry::single(name("at"), Value::binary(at.clone())));

    h.manager.store_batch(&[bundle.clone()], &[]).unwrap();
    assert_eq!(h.blobs.len(), 1);

    let back = h.manager.load_bundle(bundle.id).unwrap().unwrap();
    for (prop, expected) in [("below", &below), ("at", &at)] {
        let Value::Binary(bin) = &back.properties[&name(prop)].values[0] else {
            panic!("{prop} is not binary");
        };
        assert_eq!(bin.to_bytes().unwrap().as_ref(), expected.as_slice());
    }
}

#[test]
fn root_reports_no_parent() {
    let h = harness();
    let root = NodeBundle::new(NodeId::random(), nt("root"));
    h.manager.store_batch(&[root.clone()], &[]).unwrap();
    let back = h.manager.load_bundle(root.id).unwrap().unwrap();
    assert_eq!(back.parent_id, None);
    assert!(back.is_root());
}

#[test]
fn root_and_child_scenario() {
    let h = harness();
    let r1 = NodeId::from_u128(0xa1);
    let c1 = NodeId::from_u128(0xc1);
    let mut root = NodeBundle::new(r1, nt("root"));
    root.add_child(QName::local("child1"), c1);
    let child = NodeBundle::new(c1, nt("unstructured")).with_parent(r1);

    // Child first: phase 2 must not depend on batch order.
    h.manager.store_batch(&[child, root], &[]).unwrap();

    assert_eq!(h.manager.load_bundle(c1).unwrap().unwrap().parent_id, Some(r1));
    let children = h.manager.load_bundle(r1).unwrap().unwrap().children;
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name, QName::local("child1"));
    assert_eq!(children[0].id, c1);
}

#[test]
fn missing_bundle_loads_as_none() {
    let h = harness();
    assert_eq!(h.manager.load_bundle(NodeId::random()).unwrap(), None);
}

// ---------------------------------------------------------------------------
// Atomicity
// ---------------------------------------------------------------------------

#[test]
fn dangling_child_rolls_back_whole_batch() {
    let h = harness();
    let good = NodeBundle::new(NodeId::random(), nt("file"));
    let mut with_blob = NodeBundle::new(NodeId::random(), nt("file"));
    with_blob.set_property(PropertyEntry::single(name("data"), Value::binary(vec![0u8; 500])));
    let mut broken = NodeBundle::new(NodeId::random(), nt("folder"));
    let ghost = NodeId::random();
    broken.add_child(name("ghost"), ghost);

    let err = h
        .manager
        .store_batch(&[good.clone(), with_blob.clone(), broken.clone()], &[])
        .unwrap_err();
    assert!(matches!(err, PersistError::BatchPersistFailed(_)));
    assert!(matches!(
        err.root_cause(),
        PersistError::DanglingChildReference { child, .. } if *child == ghost
    ));

    for id in [good.id, with_blob.id, broken.id] {
        assert_eq!(h.manager.load_bundle(id).unwrap(), None);
    }
    assert!(h.manager.list_node_ids(None, 0).unwrap().is_empty());
    assert!(h.store.is_empty());
    assert!(h.blobs.is_empty(), "blobs of the rolled back batch remain");
    assert_eq!(h.store.active_connections(), 0);
}

#[test]
fn dangling_child_is_fatal_even_in_best_effort_mode() {
    let h = harness_with(config(ErrorHandling::BestEffort), 8);
    let mut broken = NodeBundle::new(NodeId::random(), nt("folder"));
    broken.add_child(name("ghost"), NodeId::random());
    assert!(h.manager.store_batch(&[broken], &[]).is_err());
    assert!(h.store.is_empty());
}

#[test]
fn failed_batch_releases_its_connection() {
    let h = harness_with(config(ErrorHandling::FailFast), 1);
    let mut bad = NodeBundle::new(NodeId::random(), nt("file"));
    bad.set_property(PropertyEntry::single(name("data"), failing_binary()));

    for _ in 0..3 {
        assert!(h.manager.store_batch(&[bad.clone()], &[]).is_err());
        assert_eq!(h.store.active_connections(), 0);
    }
    let good = NodeBundle::new(NodeId::random(), nt("file"));
    h.manager.store_batch(&[good.clone()], &[]).unwrap();
    assert!(h.manager.load_bundle(good.id).unwrap().is_some());
}

#[test]
fn stream_failure_aborts_in_fail_fast_mode() {
    let h = harness();
    let good = NodeBundle::new(NodeId::random(), nt("file"));
    let mut bad = NodeBundle::new(NodeId::random(), nt("file"));
    bad.set_property(PropertyEntry::single(name("big"), Value::binary(vec![5u8; 200])));
    bad.set_property(PropertyEntry::single(name("stream"), failing_binary()));

    let err = h.manager.store_batch(&[good.clone(), bad], &[]).unwrap_err();
    assert!(matches!(err.root_cause(), PersistError::ValueWriteFailed(_)));
    assert_eq!(h.manager.load_bundle(good.id).unwrap(), None);
    assert!(h.blobs.is_empty());
}

#[test]
fn best_effort_skips_failing_bundle() {
    let h = harness_with(config(ErrorHandling::BestEffort), 8);
    let good = NodeBundle::new(NodeId::random(), nt("file"));
    let mut bad = NodeBundle::new(NodeId::random(), nt("file"));
    bad.set_property(PropertyEntry::single(name("big"), Value::binary(vec![5u8; 200])));
    bad.set_property(PropertyEntry::single(name("stream"), failing_binary()));
    let mut missing = NodeBundle::new(NodeId::random(), nt("file"));
    missing.is_new = false;

    let stats = h
        .manager
        .store_batch(&[good.clone(), bad.clone(), missing], &[])
        .unwrap();
    assert_eq!(stats.written, 1);
    assert_eq!(stats.skipped, 2);
    assert!(h.manager.load_bundle(good.id).unwrap().is_some());
    assert_eq!(h.manager.load_bundle(bad.id).unwrap(), None);
    assert!(h.blobs.is_empty(), "skipped bundle left a blob behind");
}

#[test]
fn deleting_unknown_bundle_fails_fast() {
    let h = harness();
    let ghost = NodeBundle::new(NodeId::random(), nt("file"));
    let err = h.manager.store_batch(&[], &[ghost]).unwrap_err();
    assert!(matches!(err.root_cause(), PersistError::BundleNotFound(_)));
}

// ---------------------------------------------------------------------------
// Updates and deletes
// ---------------------------------------------------------------------------

#[test]
fn modified_bundle_replaces_state_and_children() {
    let h = harness();
    let (a, b) = (NodeId::random(), NodeId::random());
    let mut parent = NodeBundle::new(NodeId::random(), nt("folder"));
    parent.add_child(name("a"), a);
    let child_a = NodeBundle::new(a, nt("file")).with_parent(parent.id);
    let child_b = NodeBundle::new(b, nt("file")).with_parent(parent.id);
    h.manager
        .store_batch(&[parent.clone(), child_a.clone(), child_b.clone()], &[])
        .unwrap();

    let mut updated = h.manager.load_bundle(parent.id).unwrap().unwrap();
    updated.children.clear();
    updated.add_child(name("b"), b);
    updated.add_child(name("a"), a);
    updated.mod_count += 1;
    updated.set_property(PropertyEntry::single(name("title"), Value::String("t".into())));
    let stats = h.manager.store_batch(&[updated.clone()], &[]).unwrap();
    assert_eq!(stats.edges, 2);

    let back = h.manager.load_bundle(parent.id).unwrap().unwrap();
    assert_eq!(back, updated);
    assert_eq!(h.store.edge_count(), 2);
}

#[test]
fn destroyed_bundle_takes_its_blobs_along() {
    let h = harness();
    let mut bundle = NodeBundle::new(NodeId::random(), nt("file"));
    bundle.set_property(PropertyEntry::multi(
        name("chunks"),
        PropertyType::Binary,
        vec![Value::binary(vec![1u8; 100]), Value::binary(vec![2u8; 100])],
    ));
    h.manager.store_batch(&[bundle.clone()], &[]).unwrap();
    assert_eq!(h.blobs.len(), 2);

    let stats = h.manager.store_batch(&[], &[bundle.clone()]).unwrap();
    assert_eq!(stats.destroyed, 1);
    assert!(h.blobs.is_empty());
    assert_eq!(h.manager.load_bundle(bundle.id).unwrap(), None);
}

#[test]
fn replaced_binary_blob_is_deleted_after_commit() {
    let h = harness();
    let mut bundle = NodeBundle::new(NodeId::random(), nt("file"));
    bundle.set_property(PropertyEntry::single(name("data"), Value::binary(vec![1u8; 100])));
    h.manager.store_batch(&[bundle.clone()], &[]).unwrap();
    let first = h.blobs.ids();

    bundle.is_new = false;
    bundle.set_property(PropertyEntry::single(name("data"), Value::binary(vec![2u8; 100])));
    h.manager.store_batch(&[bundle.clone()], &[]).unwrap();

    let second = h.blobs.ids();
    assert_eq!(second.len(), 1);
    assert_ne!(first, second);
}

#[test]
fn deleting_a_child_drops_the_parent_edge() {
    let h = harness();
    let mut parent = NodeBundle::new(NodeId::random(), nt("folder"));
    let child = NodeBundle::new(NodeId::random(), nt("file")).with_parent(parent.id);
    parent.add_child(name("c"), child.id);
    h.manager
        .store_batch(&[parent.clone(), child.clone()], &[])
        .unwrap();

    parent.is_new = false;
    parent.children.clear();
    h.manager.store_batch(&[parent.clone()], &[child]).unwrap();
    assert!(h
        .manager
        .load_bundle(parent.id)
        .unwrap()
        .unwrap()
        .children
        .is_empty());
    assert_eq!(h.store.edge_count(), 0);
}

// ---------------------------------------------------------------------------
// Reference index
// ---------------------------------------------------------------------------

#[test]
fn phase_three_maintains_reference_index() {
    let h = harness();
    let target = NodeBundle::new(NodeId::random(), nt("file"));
    let mut holder = NodeBundle::new(NodeId::random(), nt("file"));
    holder.set_property(PropertyEntry::multi(
        name("links"),
        PropertyType::Reference,
        vec![Value::Reference(target.id)],
    ));
    holder.set_property(PropertyEntry::single(name("soft"), Value::WeakReference(target.id)));
    h.manager
        .store_batch(&[target.clone(), holder.clone()], &[])
        .unwrap();

    let record = h.manager.load_references(target.id).unwrap().unwrap();
    assert_eq!(record.len(), 2);
    assert!(record.contains(&PropertyId::new(holder.id, name("links"))));
    assert!(record.contains(&PropertyId::new(holder.id, name("soft"))));

    holder.is_new = false;
    holder.remove_property(&name("links"));
    h.manager.store_batch(&[holder.clone()], &[]).unwrap();
    let record = h.manager.load_references(target.id).unwrap().unwrap();
    assert_eq!(record.len(), 1);

    h.manager.store_batch(&[], &[holder]).unwrap();
    assert!(!h.manager.references_exist(target.id).unwrap());
}

#[test]
fn reference_record_is_unique_per_target() {
    let h = harness();
    let target = NodeId::random();
    let first = ReferenceRecord::with_references(
        target,
        [PropertyId::new(NodeId::random(), name("a"))],
    );
    let second = ReferenceRecord::with_references(
        target,
        [
            PropertyId::new(NodeId::random(), name("b")),
            PropertyId::new(NodeId::random(), name("c")),
        ],
    );
    h.manager.store_references(&first).unwrap();
    h.manager.store_references(&second).unwrap();

    assert_eq!(h.manager.load_references(target).unwrap(), Some(second));
    assert_eq!(h.store.count_class(&h.manager.config().refs_class()), 1);

    h.manager.store_references(&ReferenceRecord::new(target)).unwrap();
    assert!(!h.manager.references_exist(target).unwrap());
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn disjoint_batches_from_many_threads() {
    let h = Arc::new(harness());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let h = Arc::clone(&h);
            std::thread::spawn(move || {
                let mut root = NodeBundle::new(NodeId::random(), nt("folder"));
                let child = NodeBundle::new(NodeId::random(), nt("file")).with_parent(root.id);
                root.add_child(name("c"), child.id);
                h.manager.store_batch(&[root, child], &[]).unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap().written, 2);
    }
    assert_eq!(h.manager.list_node_ids(None, 0).unwrap().len(), 16);
    assert_eq!(h.store.active_connections(), 0);
}

#[test]
fn empty_batch_is_a_no_op() {
    let h = harness();
    assert_eq!(h.manager.store_batch(&[], &[]).unwrap(), BatchStats::default());
    assert!(h.store.is_empty());
}
