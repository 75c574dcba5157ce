//! Benchmark setups for the burrow allocators and index.
//!
//! Provides pre-sized arenas so every benchmark measures steady-state
//! operations rather than page reservation:
//!
//! - [`bench_config`]: 256 MiB arena, 64 KiB buddy chunks
//! - [`bench_arena`]: an arena built from it
//! - [`shuffled_keys`]: deterministic key order via a seeded xorshift

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::sync::Arc;

use burrow_arena::constants::PAGE_SIZE;
use burrow_arena::{Arena, ArenaConfig};

/// Configuration shared by all benchmarks.
pub fn bench_config() -> ArenaConfig {
    let mut config = ArenaConfig::new(65_536 * PAGE_SIZE);
    config.buddy_chunk_bytes = 16 * PAGE_SIZE;
    config.buddy_max_chunks = 1024;
    config
}

/// A fresh arena sized by [`bench_config`].
pub fn bench_arena() -> Arc<Arena> {
    Arc::new(Arena::new(&bench_config()).expect("bench config is valid"))
}

/// `n` distinct keys in a deterministic, scrambled order.
pub fn shuffled_keys(n: u64, seed: u64) -> Vec<u64> {
    let mut state = seed | 1;
    let mut keys: Vec<u64> = (0..n).collect();
    for i in (1..keys.len()).rev() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        keys.swap(i, (state % (i as u64 + 1)) as usize);
    }
    keys
}
