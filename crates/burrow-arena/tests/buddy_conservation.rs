//! Buddy allocator conservation and disjointness under random workloads.

use burrow_arena::{BuddyAllocator, BuddyStats};
use burrow_core::{AllocError, Offset, WordMemory};
use burrow_test_utils::fixtures::{small_arena, small_config};
use indexmap::IndexMap;
use proptest::prelude::*;
use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn assert_conserved(stats: &BuddyStats) {
    assert_eq!(
        stats.free_bytes + stats.allocated_bytes,
        stats.capacity_bytes,
        "{stats:?}"
    );
}

#[test]
fn random_sequence_conserves_bytes() {
    let arena = small_arena();
    let buddy = BuddyAllocator::new(arena.clone(), &small_config()).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut live: IndexMap<Offset, u64> = IndexMap::new();

    for step in 0..4000u64 {
        if live.is_empty() || rng.next_u32() % 5 < 3 {
            let size = 1 + rng.next_u64() % 2048;
            match buddy.alloc(size) {
                Ok(block) => {
                    // Tag the first and last requested word to catch overlap.
                    let last = Offset(block.0 + (size - 1) / 8 * 8);
                    arena.store(block, step).unwrap();
                    arena.store(last, step).unwrap();
                    assert!(live.insert(block, size).is_none());
                }
                Err(AllocError::OutOfMemory { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        } else {
            let pick = rng.next_u32() as usize % live.len();
            let (block, size) = live.swap_remove_index(pick).unwrap();
            let last = Offset(block.0 + (size - 1) / 8 * 8);
            assert_eq!(arena.load(last).unwrap(), arena.load(block).unwrap());
            buddy.free(block).unwrap();
        }
        if step % 97 == 0 {
            assert_conserved(&buddy.stats().unwrap());
        }
    }

    for (block, _) in live.drain(..) {
        buddy.free(block).unwrap();
    }
    let stats = buddy.stats().unwrap();
    assert_conserved(&stats);
    assert_eq!(stats.allocated_bytes, 0);
    assert_eq!(stats.alloc_ops, stats.free_ops);
}

#[test]
fn freeing_everything_restores_whole_free_blocks() {
    let buddy = BuddyAllocator::new(small_arena(), &small_config()).unwrap();
    let blocks: Vec<_> = (0..64).map(|_| buddy.alloc(16).unwrap()).collect();
    let fragmented = buddy.stats().unwrap();
    for block in blocks.into_iter().rev() {
        buddy.free(block).unwrap();
    }
    let stats = buddy.stats().unwrap();
    assert_eq!(stats.free_bytes, fragmented.capacity_bytes);
    assert!(stats.merges > 0);

    // The largest block is allocatable again.
    buddy.alloc(buddy.max_alloc()).unwrap();
}

#[cfg(not(miri))]
mod proptests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn conservation_holds_after_every_operation(
            ops in prop::collection::vec((any::<bool>(), 1u64..4096, any::<u16>()), 1..120)
        ) {
            let buddy = BuddyAllocator::new(small_arena(), &small_config()).unwrap();
            let mut live: Vec<Offset> = Vec::new();
            for (alloc, size, pick) in ops {
                if alloc || live.is_empty() {
                    if let Ok(block) = buddy.alloc(size) {
                        prop_assert!(!live.contains(&block));
                        live.push(block);
                    }
                } else {
                    let block = live.swap_remove(pick as usize % live.len());
                    buddy.free(block).unwrap();
                }
                let stats = buddy.stats().unwrap();
                prop_assert_eq!(stats.free_bytes + stats.allocated_bytes, stats.capacity_bytes);
            }
        }
    }
}
