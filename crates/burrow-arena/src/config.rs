//! Arena configuration parameters.

use crate::constants::{MAX_ARENA_BYTES, MAX_HEAP_CAPACITY, PAGE_SIZE, RADIX_RESERVE, WORD_SIZE};
use crate::error::ConfigError;

/// Configuration for an arena and the allocators built on it.
///
/// Validated at construction; all values are immutable after creation.
#[derive(Clone, Debug)]
pub struct ArenaConfig {
    /// Total arena capacity in bytes.
    ///
    /// Default: 64 MiB. Must be a whole number of pages, at least two pages
    /// (page 0 is reserved as the null page), and at most 2^40 bytes.
    pub capacity_bytes: u64,

    /// Items a prealloc stack pulls from the page source per top-up.
    ///
    /// Default: `5 * (2 * RADIX_LEVELS + 1)`, enough for five worst-case
    /// radix allocations before the next bulk reservation.
    pub prealloc_batch: u64,

    /// Size of one buddy chunk in bytes.
    ///
    /// Default: 1 MiB. Must be a power of two and a whole number of pages.
    pub buddy_chunk_bytes: u64,

    /// Smallest buddy block in bytes.
    ///
    /// Default: 16. Must be a power of two and at least one word, since a
    /// free block stores its free-list links in its first word.
    pub buddy_min_alloc: u64,

    /// Maximum number of chunks one buddy allocator may acquire.
    ///
    /// Default: 64.
    pub buddy_max_chunks: usize,

    /// Largest capacity accepted by a min-heap.
    ///
    /// Default: 1_048_576 elements.
    pub heap_capacity_limit: u64,
}

impl ArenaConfig {
    /// Default arena capacity: 64 MiB.
    pub const DEFAULT_CAPACITY_BYTES: u64 = 64 * 1024 * 1024;

    /// Default prealloc top-up batch.
    pub const DEFAULT_PREALLOC_BATCH: u64 = RADIX_RESERVE * 5;

    /// Default buddy chunk size: 1 MiB.
    pub const DEFAULT_BUDDY_CHUNK_BYTES: u64 = 1 << 20;

    /// Default buddy minimum block size.
    pub const DEFAULT_BUDDY_MIN_ALLOC: u64 = 16;

    /// Default buddy chunk limit.
    pub const DEFAULT_BUDDY_MAX_CHUNKS: usize = 64;

    /// Default min-heap capacity limit.
    pub const DEFAULT_HEAP_CAPACITY_LIMIT: u64 = 1 << 20;

    /// Create a config with the given capacity and defaults for everything else.
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            capacity_bytes,
            prealloc_batch: Self::DEFAULT_PREALLOC_BATCH,
            buddy_chunk_bytes: Self::DEFAULT_BUDDY_CHUNK_BYTES,
            buddy_min_alloc: Self::DEFAULT_BUDDY_MIN_ALLOC,
            buddy_max_chunks: Self::DEFAULT_BUDDY_MAX_CHUNKS,
            heap_capacity_limit: Self::DEFAULT_HEAP_CAPACITY_LIMIT,
        }
    }

    /// Number of pages in the arena, including the reserved null page.
    pub fn total_pages(&self) -> u64 {
        self.capacity_bytes / PAGE_SIZE
    }

    /// Pages making up one buddy chunk.
    pub fn buddy_chunk_pages(&self) -> u64 {
        self.buddy_chunk_bytes / PAGE_SIZE
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity_bytes == 0 || self.capacity_bytes % PAGE_SIZE != 0 {
            return Err(ConfigError::CapacityNotPageAligned {
                capacity: self.capacity_bytes,
            });
        }
        if self.capacity_bytes < 2 * PAGE_SIZE {
            return Err(ConfigError::CapacityTooSmall {
                capacity: self.capacity_bytes,
            });
        }
        if self.capacity_bytes > MAX_ARENA_BYTES {
            return Err(ConfigError::CapacityTooLarge {
                capacity: self.capacity_bytes,
                max: MAX_ARENA_BYTES,
            });
        }
        if self.prealloc_batch == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        if !self.buddy_min_alloc.is_power_of_two() || self.buddy_min_alloc < WORD_SIZE {
            return Err(ConfigError::InvalidMinAlloc {
                min_alloc: self.buddy_min_alloc,
            });
        }
        if !self.buddy_chunk_bytes.is_power_of_two()
            || self.buddy_chunk_bytes < PAGE_SIZE
            || self.buddy_chunk_bytes < self.buddy_min_alloc * 2
        {
            return Err(ConfigError::InvalidChunkSize {
                chunk_bytes: self.buddy_chunk_bytes,
            });
        }
        if self.buddy_max_chunks == 0 {
            return Err(ConfigError::ZeroChunks);
        }
        if self.heap_capacity_limit == 0 {
            return Err(ConfigError::ZeroHeapLimit);
        }
        if self.heap_capacity_limit > MAX_HEAP_CAPACITY {
            return Err(ConfigError::HeapLimitTooLarge {
                limit: self.heap_capacity_limit,
                max: MAX_HEAP_CAPACITY,
            });
        }
        Ok(())
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY_BYTES)
    }
}
