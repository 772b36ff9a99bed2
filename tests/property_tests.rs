//! Randomized model checks for the encoder, codec and tree.

use std::sync::Arc;

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use hilbert_tree::{
    hilbert, FixedAscii, InternalNode, LeafNode, MemStore, Node, PageId, PointRecord, Tree,
    TreeOptions,
};

fn record(key: u32, n: usize) -> PointRecord {
    PointRecord::from_parts(
        FixedAscii::new(&format!("rec-{n:06}")).unwrap(),
        12.5,
        -3.25,
        FixedAscii::new("2009-10-11 12:13:14").unwrap(),
        key,
    )
}

fn arb_record() -> impl Strategy<Value = PointRecord> {
    (
        any::<u32>(),
        -90.0f32..=90.0,
        -180.0f32..=180.0,
        0usize..1_000_000,
    )
        .prop_map(|(key, lat, lon, n)| {
            PointRecord::from_parts(
                FixedAscii::new(&format!("rec-{n:06}")).unwrap(),
                lat,
                lon,
                FixedAscii::new("2009-10-11 12:13:14").unwrap(),
                key,
            )
        })
}

proptest! {
    #[test]
    fn prop_encoder_is_deterministic(lat in -90.0f64..=90.0, lon in -180.0f64..=180.0) {
        prop_assert_eq!(
            hilbert::encode(lat, lon).unwrap(),
            hilbert::encode(lat, lon).unwrap()
        );
    }

    #[test]
    fn prop_out_of_range_coordinates_fail(
        lat in prop_oneof![(-1000.0f64..-90.01), (90.01f64..1000.0)],
        lon in -180.0f64..=180.0,
    ) {
        prop_assert!(hilbert::encode(lat, lon).is_err());
    }

    #[test]
    fn prop_leaf_pages_roundtrip(
        records in prop::collection::vec(arb_record(), 0..50),
        next in prop::option::of(1u32..1000),
    ) {
        let leaf = LeafNode {
            records,
            next_leaf: next.map(PageId),
        };
        let buf = Node::Leaf(leaf.clone()).encode().unwrap();
        prop_assert_eq!(Node::decode(&buf).unwrap(), Node::Leaf(leaf));
    }

    #[test]
    fn prop_internal_pages_roundtrip(keys in prop::collection::vec(any::<u32>(), 1..200)) {
        let children = (0..=keys.len() as u32).map(PageId).collect();
        let node = InternalNode { keys, children };
        let buf = Node::Internal(node.clone()).encode().unwrap();
        prop_assert_eq!(Node::decode(&buf).unwrap(), Node::Internal(node));
    }

    /// Insert an arbitrary key multiset, then every range query must agree
    /// with the sorted model: same multiset, ascending order, nothing
    /// duplicated or dropped.
    #[test]
    fn prop_range_scan_matches_sorted_model(
        keys in prop::collection::vec(0u32..10_000, 1..300),
        bounds in (0u32..10_000, 0u32..10_000),
    ) {
        let mut tree = Tree::open_with(
            Arc::new(MemStore::new()),
            TreeOptions::default().max_leaf_records(4).max_internal_keys(3),
        )
        .unwrap();
        for (n, &key) in keys.iter().enumerate() {
            tree.insert(record(key, n)).unwrap();
        }

        let (low, high) = (bounds.0.min(bounds.1), bounds.0.max(bounds.1));
        let mut expected: Vec<u32> = keys
            .iter()
            .copied()
            .filter(|key| (low..=high).contains(key))
            .collect();
        expected.sort_unstable();

        let scanned: Vec<u32> = tree
            .range_scan(low, high)
            .unwrap()
            .map(|r| r.unwrap().hilbert_key())
            .collect();
        prop_assert_eq!(scanned, expected);
        tree.verify().unwrap();
    }
}

/// Locality is statistical, not a strict bound: nearby coordinates usually
/// share a curve neighborhood, so small perturbations should mostly produce
/// small key deltas.
#[test]
fn nearby_points_usually_have_nearby_keys() {
    let mut rng = StdRng::seed_from_u64(0x48494C42);
    let mut close = 0u32;
    let samples = 2000;
    for _ in 0..samples {
        let lat = rng.gen_range(-89.0f64..89.0);
        let lon = rng.gen_range(-179.0f64..179.0);
        let key = hilbert::encode(lat, lon).unwrap();
        let nudged = hilbert::encode(lat + 0.001, lon + 0.001).unwrap();
        // One grid cell covers ~0.0027 degrees of latitude, so the nudge
        // moves at most a cell per axis.
        if key.abs_diff(nudged) <= (1 << 16) {
            close += 1;
        }
    }
    assert!(
        close >= samples * 7 / 10,
        "only {close}/{samples} perturbed pairs stayed within one row of the curve"
    );
}
