//! Structural constants shared by the arena allocators.
//!
//! These are compile-time bounds: every loop over tree depth, segment
//! entries, chunk count or retry count is bounded by one of them.

/// Size of one arena page in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// Size of one arena word in bytes.
pub const WORD_SIZE: u64 = 8;

/// Words per page.
pub const PAGE_WORDS: u64 = PAGE_SIZE / WORD_SIZE;

/// Largest arena supported. Offsets must fit in [`OFFSET_BITS`] bits.
pub const MAX_ARENA_BYTES: u64 = 1 << OFFSET_BITS;

/// Largest min-heap capacity limit: two words per element must still fit
/// in the largest arena.
pub const MAX_HEAP_CAPACITY: u64 = MAX_ARENA_BYTES / (2 * WORD_SIZE);

/// Bits of a tagged free-list head word that carry the offset.
pub const OFFSET_BITS: u32 = 40;

/// Mask extracting the offset from a tagged free-list head word.
pub const OFFSET_MASK: u64 = (1 << OFFSET_BITS) - 1;

/// Upper bound for every compare-and-swap or reserve/acquire retry loop.
pub const ALLOC_ATTEMPTS: usize = 128;

/// Radix tree depth.
pub const RADIX_LEVELS: usize = 3;

/// log2 of the radix fanout.
pub const RADIX_FANOUT_SHIFT: u32 = 9;

/// Children (or payload slots) per radix chunk.
pub const RADIX_FANOUT: usize = 1 << RADIX_FANOUT_SHIFT;

/// Words in one descriptor occupancy bitmap.
pub const RADIX_BITMAP_WORDS: usize = RADIX_FANOUT.div_ceil(64);

/// Total slots addressable by the radix tree.
pub const RADIX_CAPACITY: u64 = 1 << (RADIX_FANOUT_SHIFT as u64 * RADIX_LEVELS as u64);

/// Worst-case prealloc items consumed by one radix allocation:
/// a descriptor and a chunk per level, plus one payload slab.
pub const RADIX_RESERVE: u64 = 2 * RADIX_LEVELS as u64 + 1;

/// Offsets held by one prealloc segment page (two words go to the links).
pub const SEGMENT_CAPACITY: u64 = PAGE_WORDS - 2;

/// Largest order representable in the buddy allocator's 4-bit order field.
pub const BUDDY_MAX_ORDER: u32 = 15;

/// Free-list heads stored at the front of every buddy chunk.
pub const BUDDY_ORDERS: usize = BUDDY_MAX_ORDER as usize + 1;

// The radix bitmap scan assumes whole bitmap words.
const _: () = assert!(RADIX_FANOUT % 64 == 0);
// A radix chunk (one offset per child) must fit in one page.
const _: () = assert!(RADIX_FANOUT as u64 * WORD_SIZE <= PAGE_SIZE);
// Radix indices must fit in the positive half of an i32.
const _: () = assert!(RADIX_CAPACITY <= i32::MAX as u64 + 1);
