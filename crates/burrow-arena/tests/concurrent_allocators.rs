//! Multi-threaded stress over the shared-lock allocators.

use std::sync::Arc;
use std::thread;

use burrow_arena::{BuddyAllocator, PreallocStack, RadixAllocator, StaticAllocator};
use burrow_core::{Offset, WordMemory};
use burrow_test_utils::fixtures::{small_arena, small_config};

const THREADS: u64 = 4;
const ROUNDS: u64 = 300;

#[test]
fn radix_slots_stay_private_to_their_owner() {
    let arena = small_arena();
    let radix = RadixAllocator::new(arena.clone(), &small_config(), 8).unwrap();
    thread::scope(|s| {
        for t in 0..THREADS {
            let (radix, arena) = (&radix, &arena);
            s.spawn(move || {
                let mut mine = Vec::new();
                for i in 0..ROUNDS {
                    let slot = radix.alloc().unwrap();
                    arena.store(slot.payload, t << 32 | i).unwrap();
                    mine.push((slot, t << 32 | i));
                    if i % 3 == 2 {
                        let (old, _) = mine.remove(0);
                        radix.free(old.tid.index).unwrap();
                    }
                }
                for (slot, tag) in mine {
                    assert_eq!(radix.get(slot.tid).unwrap(), slot);
                    assert_eq!(arena.load(slot.payload).unwrap(), tag);
                }
            });
        }
    });
    let stats = radix.stats();
    assert_eq!(stats.alloc_ops, THREADS * ROUNDS);
    assert_eq!(stats.active_allocs, THREADS * (ROUNDS - ROUNDS / 3));
}

#[test]
fn buddy_blocks_never_overlap_across_threads() {
    let arena = small_arena();
    let buddy = BuddyAllocator::new(arena.clone(), &small_config()).unwrap();
    thread::scope(|s| {
        for t in 0..THREADS {
            let (buddy, arena) = (&buddy, &arena);
            s.spawn(move || {
                let mut mine: Vec<(Offset, u64)> = Vec::new();
                for i in 0..ROUNDS {
                    let block = buddy.alloc(16 + (i % 7) * 40).unwrap();
                    arena.store(block, t << 32 | i).unwrap();
                    mine.push((block, t << 32 | i));
                    if i % 2 == 1 {
                        let (old, tag) = mine.swap_remove(0);
                        assert_eq!(arena.load(old).unwrap(), tag);
                        buddy.free(old).unwrap();
                    }
                }
                for (block, tag) in mine {
                    assert_eq!(arena.load(block).unwrap(), tag);
                    buddy.free(block).unwrap();
                }
            });
        }
    });
    let stats = buddy.stats().unwrap();
    assert_eq!(stats.allocated_bytes, 0);
    assert_eq!(stats.free_bytes, stats.capacity_bytes);
}

#[test]
fn prealloc_stack_hands_each_item_out_once() {
    let arena = small_arena();
    let stack = Arc::new(PreallocStack::for_arena(arena, 1, 16).unwrap());
    let taken: Vec<Vec<Offset>> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let stack = &stack;
                s.spawn(move || {
                    let mut got = Vec::new();
                    for i in 0..100 {
                        stack.reserve(1).unwrap();
                        let item = stack.acquire();
                        // Another thread may drain the stack between the
                        // two calls; that is the only tolerated miss.
                        if let Ok(item) = item {
                            got.push(item);
                        }
                        if i % 4 == 3 {
                            if let Some(back) = got.pop() {
                                stack.release(back).unwrap();
                            }
                        }
                    }
                    got
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    let mut all: Vec<Offset> = taken.into_iter().flatten().collect();
    let total = all.len();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), total);
}

#[test]
fn bump_regions_are_disjoint_across_threads() {
    let arena = small_arena();
    let bump = StaticAllocator::new(arena.clone(), 2).unwrap();
    let regions: Vec<Vec<Offset>> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let bump = &bump;
                s.spawn(move || (0..ROUNDS).map(|_| bump.alloc(24, 8).unwrap()).collect())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    let mut all: Vec<u64> = regions.into_iter().flatten().map(|o| o.0).collect();
    all.sort();
    for pair in all.windows(2) {
        assert!(pair[1] - pair[0] >= 24);
    }
}
