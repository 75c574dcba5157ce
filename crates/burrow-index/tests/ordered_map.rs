//! Ordered map behaviour through the public API.

use std::sync::Arc;

use burrow_arena::{Arena, StaticAllocator};
use burrow_core::AllocError;
use burrow_index::{NodePool, OrderedMap};
use burrow_test_utils::fixtures::{bump, small_arena};
use burrow_test_utils::LimitedPageSource;
use proptest::prelude::*;
use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

const SCENARIO: [u64; 10] = [51, 43, 37, 3, 301, 46, 383, 990, 776, 729];

fn pool() -> Arc<NodePool> {
    let arena = small_arena();
    let bump = Arc::new(bump(&arena));
    Arc::new(NodePool::new(arena, bump).unwrap())
}

fn scenario_map() -> OrderedMap {
    let map = OrderedMap::create(pool()).unwrap();
    for key in SCENARIO {
        map.insert(key, 2 * key, false).unwrap();
    }
    map
}

fn assert_sorted(map: &OrderedMap) {
    let keys: Vec<u64> = map.entries().unwrap().into_iter().map(|(k, _)| k).collect();
    assert!(keys.windows(2).all(|w| w[0] < w[1]), "{keys:?}");
}

#[test]
fn scenario_keys_map_to_their_doubles() {
    let map = scenario_map();
    assert_eq!(map.len(), SCENARIO.len() as u64);
    for key in SCENARIO {
        assert_eq!(map.find(key).unwrap(), 2 * key);
    }
    assert_eq!(map.find(44), Err(AllocError::NotFound));
    assert_sorted(&map);
    map.check_invariants().unwrap();
}

#[test]
fn removing_any_one_scenario_key_keeps_the_rest() {
    for victim in SCENARIO {
        let map = scenario_map();
        assert_eq!(map.remove(victim).unwrap(), 2 * victim);
        assert_eq!(map.find(victim), Err(AllocError::NotFound));
        for key in SCENARIO.iter().copied().filter(|&k| k != victim) {
            assert_eq!(map.find(key).unwrap(), 2 * key, "after removing {victim}");
        }
        assert_sorted(&map);
        map.check_invariants().unwrap();
    }
}

#[test]
fn maps_share_one_pool() {
    let pool = pool();
    let a = OrderedMap::create(pool.clone()).unwrap();
    let b = OrderedMap::create(pool.clone()).unwrap();
    for k in 0..40 {
        a.insert(k, 1, false).unwrap();
        b.insert(k, 2, false).unwrap();
    }
    for k in 0..40 {
        a.remove(k).unwrap();
    }
    // Nodes a gave back are recycled by b.
    for k in 40..80 {
        b.insert(k, 2, false).unwrap();
    }
    assert!(pool.stats().recycled > 0);
    assert_eq!(b.find(79).unwrap(), 2);
    b.check_invariants().unwrap();
}

#[test]
fn out_of_nodes_leaves_the_tree_intact() {
    let arena: Arc<Arena> = small_arena();
    // One page of bump memory holds the pool head and a few dozen nodes.
    let source = Arc::new(LimitedPageSource::new(arena.clone(), 1));
    let bump = Arc::new(StaticAllocator::new(source, 1).unwrap());
    let map = OrderedMap::create(Arc::new(NodePool::new(arena, bump).unwrap())).unwrap();

    let mut inserted = Vec::new();
    let mut failure = None;
    for k in 0..1000u64 {
        match map.insert(k, k, false) {
            Ok(()) => inserted.push(k),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    assert!(matches!(failure, Some(AllocError::OutOfMemory { .. })));
    assert_eq!(map.len(), inserted.len() as u64);
    map.check_invariants().unwrap();
    for k in inserted {
        assert_eq!(map.find(k).unwrap(), k);
    }
}

#[test]
fn random_workload_matches_a_reference_map() {
    let map = OrderedMap::create(pool()).unwrap();
    let mut reference = std::collections::BTreeMap::new();
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for _ in 0..3000 {
        let key = rng.next_u64() % 500;
        if rng.next_u32() % 3 == 0 {
            assert_eq!(map.remove(key).ok(), reference.remove(&key));
        } else {
            let value = rng.next_u64();
            let fresh = !reference.contains_key(&key);
            let result = map.insert(key, value, true);
            assert!(result.is_ok());
            reference.insert(key, value);
            if fresh {
                assert_eq!(map.find(key).unwrap(), value);
            }
        }
    }
    map.check_invariants().unwrap();
    let expected: Vec<(u64, u64)> = reference.into_iter().collect();
    assert_eq!(map.entries().unwrap(), expected);
}

#[test]
fn readers_and_writers_interleave() {
    let map = Arc::new(OrderedMap::create(pool()).unwrap());
    std::thread::scope(|s| {
        for t in 0..4u64 {
            let map = &map;
            s.spawn(move || {
                for i in 0..200u64 {
                    let key = i * 4 + t;
                    map.insert(key, key + 1, false).unwrap();
                    assert_eq!(map.find(key).unwrap(), key + 1);
                    if i % 2 == 0 {
                        map.remove(key).unwrap();
                    }
                }
            });
        }
    });
    assert_eq!(map.len(), 400);
    map.check_invariants().unwrap();
}

#[cfg(not(miri))]
mod proptests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn inserts_then_finds_return_inserted_values(
            keys in prop::collection::hash_set(any::<u64>(), 1..200)
        ) {
            let map = OrderedMap::create(pool()).unwrap();
            for &k in &keys {
                map.insert(k, k.wrapping_mul(3), false).unwrap();
            }
            for &k in &keys {
                prop_assert_eq!(map.find(k).unwrap(), k.wrapping_mul(3));
            }
            prop_assert_eq!(map.len(), keys.len() as u64);
            prop_assert!(map.check_invariants().is_ok());
        }

        #[test]
        fn leaf_order_survives_mixed_operations(
            ops in prop::collection::vec((any::<bool>(), 0u64..64), 1..300)
        ) {
            let map = OrderedMap::create(pool()).unwrap();
            for (insert, key) in ops {
                if insert {
                    let _ = map.insert(key, key, false);
                } else {
                    let _ = map.remove(key);
                }
                prop_assert!(map.check_invariants().is_ok());
            }
        }
    }
}
