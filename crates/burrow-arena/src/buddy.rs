//! Power-of-two buddy allocator over large arena chunks.
//!
//! A chunk is `chunk_bytes` of contiguous arena, divided into items of
//! `min_alloc` bytes. Its bookkeeping lives at the front of the chunk:
//!
//! ```text
//! words 0..16        free-list head per order (item index, NIL if empty)
//! order area         4-bit order per item, sixteen per word
//! allocated bitmap   one bit per item
//! ```
//!
//! The items covered by the header are marked allocated at order 0 and
//! never freed, so buddies can never merge into them. A free block stores
//! its list links in its first word: `prev` in the low half, `next` in the
//! high half, both item indices.
//!
//! Only the first item of a block carries a meaningful order and allocated
//! bit. The buddy of an order-`o` block is always the first item of its
//! own block, so those two fields are enough to decide a merge.

use std::sync::Arc;

use burrow_core::{AllocError, Offset, WordMemory};
use parking_lot::Mutex;

use crate::arena::Arena;
use crate::config::ArenaConfig;
use crate::constants::{ALLOC_ATTEMPTS, BUDDY_MAX_ORDER, BUDDY_ORDERS, PAGE_SIZE, WORD_SIZE};
use crate::prealloc::PreallocStack;

const NIL: u32 = u32::MAX;

/// Buddy allocator counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuddyStats {
    /// Usable bytes across all chunks, headers excluded.
    pub capacity_bytes: u64,
    /// Bytes held by live allocations, rounded to block size.
    pub allocated_bytes: u64,
    /// Bytes on the free lists.
    pub free_bytes: u64,
    /// Chunks acquired.
    pub chunks: u64,
    /// Block halvings.
    pub splits: u64,
    /// Buddy merges.
    pub merges: u64,
    /// Successful `alloc` calls.
    pub alloc_ops: u64,
    /// Successful `free` calls.
    pub free_ops: u64,
}

/// Chunk geometry shared by every chunk of one allocator.
#[derive(Clone, Copy, Debug)]
struct Geometry {
    min_alloc: u64,
    chunk_bytes: u64,
    items: u64,
    header_items: u64,
    max_order: u32,
    order_word: u64,
    bitmap_word: u64,
}

impl Geometry {
    fn new(min_alloc: u64, chunk_bytes: u64) -> Result<Self, AllocError> {
        if !min_alloc.is_power_of_two() || min_alloc < WORD_SIZE {
            return Err(AllocError::invalid(format!(
                "buddy min_alloc {min_alloc} must be a power of two of at least 8 bytes"
            )));
        }
        if !chunk_bytes.is_power_of_two() || chunk_bytes < PAGE_SIZE || chunk_bytes < 2 * min_alloc {
            return Err(AllocError::invalid(format!(
                "buddy chunk size {chunk_bytes} must be a power-of-two number of pages"
            )));
        }
        let items = chunk_bytes / min_alloc;
        if items > NIL as u64 {
            return Err(AllocError::invalid(format!(
                "buddy chunk of {items} items exceeds the link width"
            )));
        }
        let order_word = BUDDY_ORDERS as u64;
        let bitmap_word = order_word + items.div_ceil(16);
        let header_words = bitmap_word + items.div_ceil(64);
        let header_items = (header_words * WORD_SIZE).div_ceil(min_alloc);
        // The header always costs at least one item, so the upper half is
        // the largest block a chunk can ever hold.
        if header_items > items / 2 {
            return Err(AllocError::invalid(format!(
                "buddy chunk of {chunk_bytes} bytes is too small for its header"
            )));
        }
        Ok(Self {
            min_alloc,
            chunk_bytes,
            items,
            header_items,
            max_order: (items.ilog2() - 1).min(BUDDY_MAX_ORDER),
            order_word,
            bitmap_word,
        })
    }

    fn block_bytes(&self, order: u32) -> u64 {
        self.min_alloc << order
    }

    fn usable_bytes(&self) -> u64 {
        (self.items - self.header_items) * self.min_alloc
    }

    /// Smallest order whose block holds `size` bytes.
    fn order_for(&self, size: u64) -> Option<u32> {
        let units = size.div_ceil(self.min_alloc);
        let order = units.next_power_of_two().ilog2();
        (order <= self.max_order).then_some(order)
    }
}

/// One chunk's bookkeeping, viewed through the arena.
struct Chunk<'a> {
    arena: &'a Arena,
    geo: &'a Geometry,
    base: Offset,
}

impl Chunk<'_> {
    fn word(&self, w: u64) -> Offset {
        self.base.add(w * WORD_SIZE)
    }

    fn block(&self, item: u32) -> Offset {
        self.base.add(item as u64 * self.geo.min_alloc)
    }

    fn contains(&self, offset: Offset) -> bool {
        offset.0 >= self.base.0 && offset.0 < self.base.0 + self.geo.chunk_bytes
    }

    fn head(&self, order: u32) -> Result<u32, AllocError> {
        Ok(self.arena.load(self.word(order as u64))? as u32)
    }

    fn set_head(&self, order: u32, item: u32) -> Result<(), AllocError> {
        self.arena.store(self.word(order as u64), item as u64)
    }

    fn order(&self, item: u32) -> Result<u32, AllocError> {
        let at = self.word(self.geo.order_word + item as u64 / 16);
        let shift = (item % 16) * 4;
        Ok((self.arena.load(at)? >> shift) as u32 & 0xf)
    }

    fn set_order(&self, item: u32, order: u32) -> Result<(), AllocError> {
        let at = self.word(self.geo.order_word + item as u64 / 16);
        let shift = (item % 16) * 4;
        let word = self.arena.load(at)?;
        self.arena
            .store(at, (word & !(0xf << shift)) | ((order as u64) << shift))
    }

    fn allocated(&self, item: u32) -> Result<bool, AllocError> {
        let at = self.word(self.geo.bitmap_word + item as u64 / 64);
        Ok(self.arena.load(at)? & (1 << (item % 64)) != 0)
    }

    fn set_allocated(&self, item: u32, on: bool) -> Result<(), AllocError> {
        let at = self.word(self.geo.bitmap_word + item as u64 / 64);
        let bit = 1u64 << (item % 64);
        let word = self.arena.load(at)?;
        self.arena
            .store(at, if on { word | bit } else { word & !bit })
    }

    fn links(&self, item: u32) -> Result<(u32, u32), AllocError> {
        let word = self.arena.load(self.block(item))?;
        Ok((word as u32, (word >> 32) as u32))
    }

    fn set_links(&self, item: u32, prev: u32, next: u32) -> Result<(), AllocError> {
        self.arena
            .store(self.block(item), prev as u64 | ((next as u64) << 32))
    }

    fn set_prev(&self, item: u32, prev: u32) -> Result<(), AllocError> {
        let (_, next) = self.links(item)?;
        self.set_links(item, prev, next)
    }

    fn set_next(&self, item: u32, next: u32) -> Result<(), AllocError> {
        let (prev, _) = self.links(item)?;
        self.set_links(item, prev, next)
    }

    fn push_free(&self, order: u32, item: u32) -> Result<(), AllocError> {
        let head = self.head(order)?;
        self.set_links(item, NIL, head)?;
        if head != NIL {
            self.set_prev(head, item)?;
        }
        self.set_head(order, item)?;
        self.set_order(item, order)
    }

    fn unlink_free(&self, order: u32, item: u32) -> Result<(), AllocError> {
        let (prev, next) = self.links(item)?;
        if prev == NIL {
            self.set_head(order, next)?;
        } else {
            self.set_next(prev, next)?;
        }
        if next != NIL {
            self.set_prev(next, prev)?;
        }
        Ok(())
    }

    /// Lay out a fresh chunk: empty lists, header reserved, rest free.
    fn init(&self) -> Result<(), AllocError> {
        for order in 0..BUDDY_ORDERS as u32 {
            self.set_head(order, NIL)?;
        }
        let header_end = self.geo.order_word + self.geo.items.div_ceil(16) + self.geo.items.div_ceil(64);
        self.arena.zero(
            self.word(self.geo.order_word),
            (header_end - self.geo.order_word) * WORD_SIZE,
        )?;
        for item in 0..self.geo.header_items as u32 {
            self.set_allocated(item, true)?;
        }
        let mut item = self.geo.header_items;
        while item < self.geo.items {
            let mut order = item.trailing_zeros().min(self.geo.max_order);
            while item + (1 << order) > self.geo.items {
                order -= 1;
            }
            self.push_free(order, item as u32)?;
            item += 1 << order;
        }
        Ok(())
    }

    /// Carve an order-`order` block, splitting a larger one if needed.
    fn alloc(&self, order: u32, stats: &mut BuddyStats) -> Result<Option<Offset>, AllocError> {
        let mut found = None;
        for o in order..=self.geo.max_order {
            if self.head(o)? != NIL {
                found = Some(o);
                break;
            }
        }
        let Some(mut have) = found else {
            return Ok(None);
        };
        let item = self.head(have)?;
        self.unlink_free(have, item)?;
        while have > order {
            have -= 1;
            self.push_free(have, item + (1 << have))?;
            stats.splits += 1;
        }
        self.set_order(item, order)?;
        self.set_allocated(item, true)?;
        Ok(Some(self.block(item)))
    }

    /// Free the block at `offset`, merging with free buddies. Returns its order.
    fn free(&self, offset: Offset, stats: &mut BuddyStats) -> Result<u32, AllocError> {
        let rel = offset.0 - self.base.0;
        if rel % self.geo.min_alloc != 0 {
            return Err(AllocError::invalid(format!(
                "offset {offset} is not a block boundary"
            )));
        }
        let mut item = (rel / self.geo.min_alloc) as u32;
        if (item as u64) < self.geo.header_items {
            return Err(AllocError::invalid(format!(
                "offset {offset} lies in the chunk header"
            )));
        }
        if !self.allocated(item)? {
            return Err(AllocError::invalid(format!(
                "offset {offset} is not an allocated block"
            )));
        }
        let freed = self.order(item)?;
        self.set_allocated(item, false)?;

        let mut order = freed;
        while order < self.geo.max_order {
            let buddy = item ^ (1 << order);
            if self.allocated(buddy)? || self.order(buddy)? != order {
                break;
            }
            self.unlink_free(order, buddy)?;
            item = item.min(buddy);
            order += 1;
            stats.merges += 1;
        }
        self.push_free(order, item)?;
        Ok(freed)
    }

    /// Bytes on this chunk's free lists.
    fn free_bytes(&self) -> Result<u64, AllocError> {
        let mut total = 0;
        for order in 0..=self.geo.max_order {
            let mut item = self.head(order)?;
            let mut steps = 0;
            while item != NIL {
                if steps >= self.geo.items {
                    return Err(AllocError::integrity(format!(
                        "order {order} free list of chunk {} does not terminate",
                        self.base
                    )));
                }
                total += self.geo.block_bytes(order);
                item = self.links(item)?.1;
                steps += 1;
            }
        }
        Ok(total)
    }
}

struct BuddyState {
    chunks: Vec<Offset>,
    stats: BuddyStats,
}

/// Variable-size allocator handing out power-of-two blocks.
pub struct BuddyAllocator {
    arena: Arc<Arena>,
    stack: PreallocStack,
    geo: Geometry,
    max_chunks: usize,
    state: Mutex<BuddyState>,
}

// Compile-time assertion: BuddyAllocator must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<BuddyAllocator>();
};

impl BuddyAllocator {
    /// Create an allocator with the chunk geometry from `config`.
    ///
    /// No chunk is acquired until the first allocation.
    pub fn new(arena: Arc<Arena>, config: &ArenaConfig) -> Result<Self, AllocError> {
        config.validate()?;
        let geo = Geometry::new(config.buddy_min_alloc, config.buddy_chunk_bytes)?;
        let stack = PreallocStack::for_arena(arena.clone(), config.buddy_chunk_pages(), 1)?;
        Ok(Self {
            arena,
            stack,
            geo,
            max_chunks: config.buddy_max_chunks,
            state: Mutex::new(BuddyState {
                chunks: Vec::new(),
                stats: BuddyStats::default(),
            }),
        })
    }

    /// Smallest block size.
    pub fn min_alloc(&self) -> u64 {
        self.geo.min_alloc
    }

    /// Largest size a single allocation may request.
    pub fn max_alloc(&self) -> u64 {
        self.geo.block_bytes(self.geo.max_order)
    }

    /// Allocate a block of at least `size` bytes.
    ///
    /// The block is `min_alloc << order` bytes for the smallest order that
    /// fits, aligned to its own size within the chunk. A new chunk is
    /// acquired when no existing chunk can supply the order.
    pub fn alloc(&self, size: u64) -> Result<Offset, AllocError> {
        if size == 0 {
            return Err(AllocError::invalid("zero-sized buddy allocation"));
        }
        let Some(order) = self.geo.order_for(size) else {
            return Err(AllocError::invalid(format!(
                "buddy allocation of {size} bytes exceeds {}",
                self.max_alloc()
            )));
        };
        for _ in 0..ALLOC_ATTEMPTS {
            {
                let mut st = self.state.lock();
                let BuddyState { chunks, stats } = &mut *st;
                for &base in chunks.iter() {
                    let chunk = self.chunk(base);
                    if let Some(block) = chunk.alloc(order, stats)? {
                        stats.alloc_ops += 1;
                        stats.allocated_bytes += self.geo.block_bytes(order);
                        return Ok(block);
                    }
                }
                if chunks.len() >= self.max_chunks {
                    tracing::warn!(
                        size,
                        chunks = chunks.len(),
                        "buddy allocator reached its chunk limit"
                    );
                    return Err(AllocError::OutOfMemory { requested: size });
                }
            }
            self.grow()?;
        }
        tracing::warn!(size, "buddy alloc retries exhausted");
        Err(AllocError::OutOfMemory { requested: size })
    }

    /// Acquire and lay out one more chunk.
    fn grow(&self) -> Result<(), AllocError> {
        self.stack.reserve(1)?;
        let base = self.stack.acquire()?;
        let mut st = self.state.lock();
        if st.chunks.len() >= self.max_chunks {
            drop(st);
            return self.stack.release(base);
        }
        self.chunk(base).init()?;
        st.chunks.push(base);
        st.stats.chunks += 1;
        st.stats.capacity_bytes += self.geo.usable_bytes();
        tracing::debug!(chunk = %base, chunks = st.chunks.len(), "buddy chunk acquired");
        Ok(())
    }

    fn chunk(&self, base: Offset) -> Chunk<'_> {
        Chunk {
            arena: &self.arena,
            geo: &self.geo,
            base,
        }
    }

    /// Free a block returned by [`alloc`](Self::alloc).
    ///
    /// Fails with `InvalidArgument` if `offset` is not the start of a live
    /// block owned by this allocator.
    pub fn free(&self, offset: Offset) -> Result<(), AllocError> {
        let mut st = self.state.lock();
        let BuddyState { chunks, stats } = &mut *st;
        let Some(chunk) = chunks
            .iter()
            .map(|&base| self.chunk(base))
            .find(|c| c.contains(offset))
        else {
            return Err(AllocError::invalid(format!(
                "offset {offset} is not owned by this buddy allocator"
            )));
        };
        let order = chunk.free(offset, stats)?;
        stats.free_ops += 1;
        stats.allocated_bytes -= self.geo.block_bytes(order);
        Ok(())
    }

    /// Counter snapshot. Walks every free list to total `free_bytes`.
    pub fn stats(&self) -> Result<BuddyStats, AllocError> {
        let st = self.state.lock();
        let mut stats = st.stats;
        stats.free_bytes = 0;
        for &base in &st.chunks {
            stats.free_bytes += self.chunk(base).free_bytes()?;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ArenaConfig {
        let mut config = ArenaConfig::new(64 * PAGE_SIZE);
        config.buddy_chunk_bytes = 4 * PAGE_SIZE;
        config.buddy_min_alloc = 16;
        config.buddy_max_chunks = 4;
        config
    }

    fn buddy() -> BuddyAllocator {
        let config = config();
        let arena = Arc::new(Arena::new(&config).unwrap());
        BuddyAllocator::new(arena, &config).unwrap()
    }

    fn assert_conserved(buddy: &BuddyAllocator) {
        let stats = buddy.stats().unwrap();
        assert_eq!(stats.free_bytes + stats.allocated_bytes, stats.capacity_bytes);
    }

    #[test]
    fn geometry_reserves_header_items() {
        // 1024 items: 16 heads + 64 order words + 16 bitmap words = 96 words.
        let geo = Geometry::new(16, 4 * PAGE_SIZE).unwrap();
        assert_eq!(geo.items, 1024);
        assert_eq!(geo.header_items, 48);
        assert_eq!(geo.max_order, 9);
        assert_eq!(geo.order_for(1), Some(0));
        assert_eq!(geo.order_for(17), Some(1));
        assert_eq!(geo.order_for(16 << 9), Some(9));
        assert_eq!(geo.order_for((16 << 9) + 1), None);
    }

    #[test]
    fn order_is_capped_at_fifteen() {
        let geo = Geometry::new(8, 1 << 20).unwrap();
        assert_eq!(geo.max_order, BUDDY_MAX_ORDER);
    }

    #[test]
    fn zero_and_oversized_requests_rejected() {
        let buddy = buddy();
        assert!(matches!(buddy.alloc(0), Err(AllocError::InvalidArgument { .. })));
        assert!(matches!(
            buddy.alloc(buddy.max_alloc() + 1),
            Err(AllocError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn blocks_are_aligned_to_their_size() {
        let buddy = buddy();
        for size in [16, 32, 100, 256, 1000] {
            let block = buddy.alloc(size).unwrap();
            let rounded = size.next_power_of_two().max(16);
            assert_eq!(block.0 % rounded, 0, "size {size}");
        }
        assert_conserved(&buddy);
    }

    #[test]
    fn first_alloc_acquires_a_chunk() {
        let buddy = buddy();
        buddy.alloc(16).unwrap();
        let stats = buddy.stats().unwrap();
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.capacity_bytes, (1024 - 48) * 16);
        assert_eq!(stats.allocated_bytes, 16);
    }

    #[test]
    fn free_merges_back_to_the_initial_layout() {
        let buddy = buddy();
        let a = buddy.alloc(16).unwrap();
        let before = buddy.stats().unwrap();
        let b = buddy.alloc(16).unwrap();
        buddy.free(b).unwrap();
        buddy.free(a).unwrap();
        let after = buddy.stats().unwrap();
        assert_eq!(after.allocated_bytes, 0);
        assert_eq!(after.free_bytes, after.capacity_bytes);
        assert!(after.merges >= before.splits);
        // Same block comes back first.
        assert_eq!(buddy.alloc(16).unwrap(), a);
    }

    #[test]
    fn invalid_frees_rejected() {
        let buddy = buddy();
        let a = buddy.alloc(64).unwrap();
        assert!(buddy.free(a.add(8)).is_err());
        assert!(buddy.free(Offset(PAGE_SIZE * 60)).is_err());
        buddy.free(a).unwrap();
        assert!(matches!(
            buddy.free(a),
            Err(AllocError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn header_offset_rejected() {
        let buddy = buddy();
        // The first block sits right after the header.
        let a = buddy.alloc(16).unwrap();
        assert!(matches!(
            buddy.free(Offset(a.0 - 16)),
            Err(AllocError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn chunk_limit_is_out_of_memory() {
        let buddy = buddy();
        // Each chunk holds exactly one 8 KiB block (order 9).
        for _ in 0..4 {
            buddy.alloc(8192).unwrap();
        }
        assert!(matches!(
            buddy.alloc(8192),
            Err(AllocError::OutOfMemory { .. })
        ));
        assert_eq!(buddy.stats().unwrap().chunks, 4);
        assert_conserved(&buddy);
    }
}
