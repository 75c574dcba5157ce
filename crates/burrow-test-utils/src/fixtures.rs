//! Small, fast arena setups shared by the burrow test suites.

use std::sync::Arc;

use burrow_arena::constants::PAGE_SIZE;
use burrow_arena::{Arena, ArenaConfig, BuddyAllocator, RadixAllocator, StaticAllocator};

/// A 4 MiB config with 16 KiB buddy chunks, so chunk growth is cheap to hit.
pub fn small_config() -> ArenaConfig {
    let mut config = ArenaConfig::new(1024 * PAGE_SIZE);
    config.prealloc_batch = 8;
    config.buddy_chunk_bytes = 4 * PAGE_SIZE;
    config.buddy_min_alloc = 16;
    config.buddy_max_chunks = 32;
    config.heap_capacity_limit = 4096;
    config
}

/// An arena sized by [`small_config`].
pub fn small_arena() -> Arc<Arena> {
    Arc::new(Arena::new(&small_config()).expect("small_config is valid"))
}

/// A radix allocator for `payload_size`-byte payloads on a fresh small arena.
pub fn radix(payload_size: u64) -> RadixAllocator {
    RadixAllocator::new(small_arena(), &small_config(), payload_size)
        .expect("radix allocator on a fresh arena")
}

/// A buddy allocator on a fresh small arena.
pub fn buddy() -> BuddyAllocator {
    BuddyAllocator::new(small_arena(), &small_config()).expect("buddy allocator on a fresh arena")
}

/// A bump allocator on `arena`, refilling four pages at a time.
pub fn bump(arena: &Arc<Arena>) -> StaticAllocator {
    StaticAllocator::new(arena.clone(), 4).expect("nonzero batch")
}
