//! Node id enumeration over the unique index.

use std::collections::BTreeSet;

use arbor_persist::{PersistenceConfig, PersistenceManager};
use arbor_types::{NodeBundle, NodeId, QName};
use proptest::prelude::*;

fn manager_with(ids: &BTreeSet<u128>) -> (PersistenceManager, Vec<NodeId>) {
    let manager = PersistenceManager::in_memory(PersistenceConfig::default()).unwrap();
    manager.init().unwrap();
    let bundles: Vec<_> = ids
        .iter()
        .map(|&raw| NodeBundle::new(NodeId::from_u128(raw), QName::local("node")))
        .collect();
    manager.store_batch(&bundles, &[]).unwrap();
    let mut sorted: Vec<_> = bundles.iter().map(|b| b.id).collect();
    sorted.sort();
    (manager, sorted)
}

#[test]
fn pages_cover_every_id_once() {
    let raw: BTreeSet<u128> = (1..=25u128).map(|n| n * 0x1_0000_0000_0000_0001).collect();
    let (manager, expected) = manager_with(&raw);

    let mut seen = Vec::new();
    let mut after = None;
    loop {
        let page = manager.list_node_ids(after, 7).unwrap();
        if page.is_empty() {
            break;
        }
        assert!(page.len() <= 7);
        after = page.last().copied();
        seen.extend(page);
    }
    assert_eq!(seen, expected);
}

#[test]
fn zero_means_unbounded() {
    let raw: BTreeSet<u128> = (1..=100u128).collect();
    let (manager, expected) = manager_with(&raw);
    assert_eq!(manager.list_node_ids(None, 0).unwrap(), expected);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn listing_is_bounded_sorted_and_after(
        raw in proptest::collection::btree_set(any::<u128>(), 0..40),
        after in proptest::option::of(any::<u128>()),
        max_count in 0usize..12,
    ) {
        let (manager, all) = manager_with(&raw);
        let after = after.map(NodeId::from_u128);
        let listed = manager.list_node_ids(after, max_count).unwrap();

        if max_count > 0 {
            prop_assert!(listed.len() <= max_count);
        }
        prop_assert!(listed.windows(2).all(|w| w[0] < w[1]));
        if let Some(after) = after {
            prop_assert!(listed.iter().all(|id| id.to_string() > after.to_string()));
        }

        let expected: Vec<_> = all
            .into_iter()
            .filter(|id| after.map_or(true, |a| id.to_string() > a.to_string()))
            .take(if max_count == 0 { usize::MAX } else { max_count })
            .collect();
        prop_assert_eq!(listed, expected);
    }
}
