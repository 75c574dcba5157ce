//! Radix index allocator.
//!
//! [`RadixAllocator`] hands out generation-tagged slot identifiers backed by
//! fixed-size payload blocks. The tree has [`RADIX_LEVELS`] levels of
//! [`RADIX_FANOUT`]-way descriptors; a slot index spells out its own path,
//! nine bits per level, so lookups never search.
//!
//! Occupancy is tracked bottom-up. A leaf bit means "slot allocated"; an
//! internal bit means "that child is full". Each descriptor's `nr_free`
//! mirrors its clear bits, so choosing a child with room is a bitmap scan
//! of one descriptor per level.
//!
//! Every allocation first reserves [`RADIX_RESERVE`] pages on its own
//! prealloc stack, so the descent never reaches the page source midway.

use std::sync::Arc;

use burrow_core::{AllocError, Offset, PageSource, Tid, WordMemory};
use parking_lot::Mutex;

use crate::arena::Arena;
use crate::config::ArenaConfig;
use crate::constants::{
    RADIX_CAPACITY, RADIX_FANOUT, RADIX_FANOUT_SHIFT, RADIX_LEVELS, RADIX_RESERVE, WORD_SIZE,
};
use crate::descriptor::Descriptor;
use crate::handle::Slot;
use crate::pool::SlabPool;
use crate::prealloc::PreallocStack;

/// Radix allocator counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RadixStats {
    /// Descriptor/chunk pairs created, root included.
    pub chunk_allocs: u64,
    /// Payload blocks carved from the slab pool.
    pub data_allocs: u64,
    /// Successful `alloc` calls.
    pub alloc_ops: u64,
    /// Successful `free` calls.
    pub free_ops: u64,
    /// Slots currently allocated.
    pub active_allocs: u64,
}

struct RadixState {
    root: Descriptor,
    pool: SlabPool,
    stats: RadixStats,
}

/// Generation-tagged slot allocator.
///
/// One lock serializes `alloc` and `free`, since an occupancy update spans
/// several levels.
pub struct RadixAllocator {
    arena: Arc<Arena>,
    stack: PreallocStack,
    payload_size: u64,
    state: Mutex<RadixState>,
}

// Compile-time assertion: RadixAllocator must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<RadixAllocator>();
};

fn path_of(index: u64) -> [usize; RADIX_LEVELS] {
    let mut path = [0; RADIX_LEVELS];
    for (level, pos) in path.iter_mut().enumerate() {
        let shift = RADIX_FANOUT_SHIFT as usize * (RADIX_LEVELS - 1 - level);
        *pos = (index >> shift) as usize & (RADIX_FANOUT - 1);
    }
    path
}

fn index_of(path: &[usize; RADIX_LEVELS]) -> u64 {
    path.iter()
        .fold(0, |acc, &pos| (acc << RADIX_FANOUT_SHIFT) | pos as u64)
}

impl RadixAllocator {
    /// Create an allocator for `payload_size`-byte payloads, reserving
    /// pages straight from `arena`.
    pub fn new(
        arena: Arc<Arena>,
        config: &ArenaConfig,
        payload_size: u64,
    ) -> Result<Self, AllocError> {
        let source: Arc<dyn PageSource> = arena.clone();
        Self::with_source(arena, source, config.prealloc_batch, payload_size)
    }

    /// Create an allocator drawing pages from `source` in batches of `batch`.
    pub fn with_source(
        arena: Arc<Arena>,
        source: Arc<dyn PageSource>,
        batch: u64,
        payload_size: u64,
    ) -> Result<Self, AllocError> {
        let pool = SlabPool::new(payload_size)?;
        let stack = PreallocStack::new(arena.clone(), source, 1, batch)?;
        stack.reserve(2)?;
        let root = Descriptor(stack.acquire()?);
        root.init(&arena, stack.acquire()?)?;
        tracing::debug!(payload_size, root = %root.0, "radix allocator initialised");
        Ok(Self {
            arena,
            stack,
            payload_size,
            state: Mutex::new(RadixState {
                root,
                pool,
                stats: RadixStats {
                    chunk_allocs: 1,
                    ..RadixStats::default()
                },
            }),
        })
    }

    /// Payload bytes per slot.
    pub fn payload_size(&self) -> u64 {
        self.payload_size
    }

    /// Total slots the tree can address.
    pub fn capacity(&self) -> u64 {
        RADIX_CAPACITY
    }

    fn new_descriptor(&self, stats: &mut RadixStats) -> Result<Descriptor, AllocError> {
        let desc = Descriptor(self.stack.acquire()?);
        desc.init(&self.arena, self.stack.acquire()?)?;
        stats.chunk_allocs += 1;
        Ok(desc)
    }

    /// Allocate a slot.
    ///
    /// Returns the slot's identifier and its zeroed payload. The generation
    /// is whatever the slot's previous occupant left behind, zero for a
    /// slot never used before.
    pub fn alloc(&self) -> Result<Slot, AllocError> {
        let mut st = self.state.lock();
        self.stack.reserve(RADIX_RESERVE)?;

        let mut descs = [st.root; RADIX_LEVELS];
        let mut path = [0usize; RADIX_LEVELS];
        for level in 0..RADIX_LEVELS {
            let desc = descs[level];
            let Some(pos) = desc.first_free(&self.arena)? else {
                if level == 0 {
                    tracing::warn!(capacity = RADIX_CAPACITY, "radix tree is full");
                    return Err(AllocError::OutOfMemory {
                        requested: st.pool.elem_size(),
                    });
                }
                return Err(AllocError::integrity(format!(
                    "level {level} descriptor {} has no free slot below a non-full parent",
                    desc.0
                )));
            };
            path[level] = pos;
            if level + 1 < RADIX_LEVELS {
                let child = desc.child(&self.arena, pos)?;
                descs[level + 1] = if child.is_null() {
                    let fresh = self.new_descriptor(&mut st.stats)?;
                    desc.set_child(&self.arena, pos, fresh.0)?;
                    fresh
                } else {
                    Descriptor(child)
                };
            }
        }

        let leaf = descs[RADIX_LEVELS - 1];
        let leaf_pos = path[RADIX_LEVELS - 1];
        let mut block = leaf.child(&self.arena, leaf_pos)?;
        let generation = if block.is_null() {
            block = st.pool.alloc(&self.stack)?;
            leaf.set_child(&self.arena, leaf_pos, block)?;
            st.stats.data_allocs += 1;
            0
        } else {
            Tid::from_bits(self.arena.load(block)?).generation
        };

        for level in (0..RADIX_LEVELS).rev() {
            let desc = descs[level];
            desc.set(&self.arena, path[level])?;
            let nr_free = desc.nr_free(&self.arena)?;
            if nr_free == 0 {
                return Err(AllocError::integrity(format!(
                    "descriptor {} marked a slot with nr_free already zero",
                    desc.0
                )));
            }
            desc.set_nr_free(&self.arena, nr_free - 1)?;
            if nr_free > 1 {
                break;
            }
        }

        let tid = Tid::new(index_of(&path) as i32, generation);
        let payload = block.add(WORD_SIZE);
        self.arena.store(block, tid.to_bits())?;
        self.arena.zero(payload, st.pool.elem_size() - WORD_SIZE)?;
        st.stats.alloc_ops += 1;
        st.stats.active_allocs += 1;
        Ok(Slot { tid, payload })
    }

    fn check_index(index: i32) -> Result<u64, AllocError> {
        if index < 0 || index as u64 >= RADIX_CAPACITY {
            return Err(AllocError::invalid(format!(
                "slot index {index} outside 0..{RADIX_CAPACITY}"
            )));
        }
        Ok(index as u64)
    }

    /// Walk to the leaf holding `index`. `None` if any level is missing.
    fn walk(
        &self,
        root: Descriptor,
        index: u64,
    ) -> Result<Option<([Descriptor; RADIX_LEVELS], [usize; RADIX_LEVELS])>, AllocError> {
        let path = path_of(index);
        let mut descs = [root; RADIX_LEVELS];
        for level in 1..RADIX_LEVELS {
            let child = descs[level - 1].child(&self.arena, path[level - 1])?;
            if child.is_null() {
                return Ok(None);
            }
            descs[level] = Descriptor(child);
        }
        Ok(Some((descs, path)))
    }

    /// Resolve a slot index to its live slot.
    ///
    /// Fails with `InvalidArgument` for an index outside the tree and
    /// `NotFound` if the slot is not allocated.
    pub fn lookup(&self, index: i32) -> Result<Slot, AllocError> {
        let index = Self::check_index(index)?;
        let st = self.state.lock();
        let Some((descs, path)) = self.walk(st.root, index)? else {
            return Err(AllocError::NotFound);
        };
        let leaf = descs[RADIX_LEVELS - 1];
        let pos = path[RADIX_LEVELS - 1];
        if !leaf.is_set(&self.arena, pos)? {
            return Err(AllocError::NotFound);
        }
        let block = leaf.child(&self.arena, pos)?;
        if block.is_null() {
            return Err(AllocError::integrity(format!(
                "allocated slot {index} has no payload block"
            )));
        }
        Ok(Slot {
            tid: Tid::from_bits(self.arena.load(block)?),
            payload: block.add(WORD_SIZE),
        })
    }

    /// Resolve an identifier, rejecting stale ones.
    ///
    /// `NotFound` if the slot is free or now holds a later generation.
    pub fn get(&self, tid: Tid) -> Result<Slot, AllocError> {
        let slot = self.lookup(tid.index)?;
        if slot.tid != tid {
            return Err(AllocError::NotFound);
        }
        Ok(slot)
    }

    /// Free the slot at `index`.
    ///
    /// Bumps the slot's generation so the next occupant is distinguishable.
    pub fn free(&self, index: i32) -> Result<(), AllocError> {
        let index = Self::check_index(index)?;
        let mut st = self.state.lock();
        let Some((descs, path)) = self.walk(st.root, index)? else {
            return Err(AllocError::NotFound);
        };
        let leaf = descs[RADIX_LEVELS - 1];
        let leaf_pos = path[RADIX_LEVELS - 1];
        if !leaf.is_set(&self.arena, leaf_pos)? {
            return Err(AllocError::NotFound);
        }
        let block = leaf.child(&self.arena, leaf_pos)?;
        let old = Tid::from_bits(self.arena.load(block)?);
        let next = Tid::new(old.index, old.generation.wrapping_add(1));
        self.arena.store(block, next.to_bits())?;

        for level in (0..RADIX_LEVELS).rev() {
            let desc = descs[level];
            let nr_free = desc.nr_free(&self.arena)?;
            desc.clear(&self.arena, path[level])?;
            desc.set_nr_free(&self.arena, nr_free + 1)?;
            // Only a node that was full has its bit set in the parent.
            if nr_free != 0 {
                break;
            }
        }

        st.stats.free_ops += 1;
        st.stats.active_allocs -= 1;
        Ok(())
    }

    /// Counter snapshot.
    pub fn stats(&self) -> RadixStats {
        self.state.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PAGE_SIZE;

    fn allocator(payload: u64) -> RadixAllocator {
        let arena = Arc::new(Arena::with_capacity(256 * PAGE_SIZE).unwrap());
        RadixAllocator::new(arena, &ArenaConfig::new(256 * PAGE_SIZE), payload).unwrap()
    }

    #[test]
    fn path_round_trips_through_index() {
        for index in [0, 1, 511, 512, 262_143, 262_144, 134_217_727] {
            assert_eq!(index_of(&path_of(index)), index);
        }
        assert_eq!(path_of(513), [0, 1, 1]);
    }

    #[test]
    fn sequential_allocations_get_sequential_indices() {
        let radix = allocator(16);
        for expected in 0..10 {
            let slot = radix.alloc().unwrap();
            assert_eq!(slot.tid, Tid::new(expected, 0));
        }
        let stats = radix.stats();
        assert_eq!(stats.chunk_allocs, 3);
        assert_eq!(stats.data_allocs, 10);
        assert_eq!(stats.active_allocs, 10);
    }

    #[test]
    fn payload_is_zeroed_on_alloc() {
        let radix = allocator(24);
        let slot = radix.alloc().unwrap();
        radix.arena.store(slot.payload.add(8), 0xdead).unwrap();
        radix.free(slot.tid.index).unwrap();
        let again = radix.alloc().unwrap();
        assert_eq!(again.payload, slot.payload);
        assert_eq!(radix.arena.load(again.payload.add(8)).unwrap(), 0);
    }

    #[test]
    fn free_bumps_generation() {
        let radix = allocator(8);
        let first = radix.alloc().unwrap();
        radix.free(first.tid.index).unwrap();
        let second = radix.alloc().unwrap();
        assert_eq!(second.tid.index, first.tid.index);
        assert!(second.tid.generation > first.tid.generation);
        assert_eq!(radix.get(first.tid), Err(AllocError::NotFound));
        assert_eq!(radix.get(second.tid).unwrap(), second);
    }

    #[test]
    fn lookup_reports_missing_slots() {
        let radix = allocator(8);
        assert_eq!(radix.lookup(0), Err(AllocError::NotFound));
        let slot = radix.alloc().unwrap();
        assert_eq!(radix.lookup(0).unwrap(), slot);
        assert_eq!(radix.lookup(1), Err(AllocError::NotFound));
        assert_eq!(radix.lookup(1 << 20), Err(AllocError::NotFound));
        assert!(matches!(
            radix.lookup(-1),
            Err(AllocError::InvalidArgument { .. })
        ));
        assert!(matches!(
            radix.lookup(RADIX_CAPACITY as i32),
            Err(AllocError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn double_free_is_not_found() {
        let radix = allocator(8);
        let slot = radix.alloc().unwrap();
        radix.free(slot.tid.index).unwrap();
        assert_eq!(radix.free(slot.tid.index), Err(AllocError::NotFound));
        assert_eq!(radix.stats().free_ops, 1);
    }

    #[test]
    fn filling_a_leaf_moves_to_the_next() {
        let radix = allocator(0);
        for _ in 0..RADIX_FANOUT {
            radix.alloc().unwrap();
        }
        let next = radix.alloc().unwrap();
        assert_eq!(next.tid.index, RADIX_FANOUT as i32);
        assert_eq!(radix.stats().chunk_allocs, 4);

        // Freeing in the full leaf makes it the first choice again.
        radix.free(7).unwrap();
        assert_eq!(radix.alloc().unwrap().tid, Tid::new(7, 1));
    }

    #[test]
    fn oversized_payload_rejected() {
        let arena = Arc::new(Arena::with_capacity(16 * PAGE_SIZE).unwrap());
        assert!(matches!(
            RadixAllocator::new(arena, &ArenaConfig::default(), PAGE_SIZE),
            Err(AllocError::InvalidArgument { .. })
        ));
    }
}
