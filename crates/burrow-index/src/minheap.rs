//! Bounded binary min-heap stored in the arena.
//!
//! Layout: word 0 is the element count, word 1 the capacity, then two words
//! per element (`id`, `weight`). Ordering is by ascending weight.

use std::sync::Arc;

use burrow_arena::constants::WORD_SIZE;
use burrow_arena::{Arena, ArenaConfig, StaticAllocator};
use burrow_core::{AllocError, Offset, WordMemory};

const SIZE_WORD: u64 = 0;
const CAPACITY_WORD: u64 = 1;
const ELEMS_WORD: u64 = 2;

/// One heap entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HeapElem {
    /// Caller-chosen identifier.
    pub id: u64,
    /// Priority; smaller pops first.
    pub weight: u64,
}

/// Fixed-capacity priority selector.
pub struct MinHeap {
    arena: Arc<Arena>,
    base: Offset,
    capacity: u64,
    len: u64,
}

impl MinHeap {
    /// Allocate a heap for `capacity` elements.
    ///
    /// Fails with `InvalidArgument` for a zero capacity or one above the
    /// configured limit.
    pub fn alloc(
        arena: Arc<Arena>,
        bump: &StaticAllocator,
        config: &ArenaConfig,
        capacity: u64,
    ) -> Result<Self, AllocError> {
        if capacity == 0 || capacity > config.heap_capacity_limit {
            return Err(AllocError::invalid(format!(
                "heap capacity {capacity} outside 1..={}",
                config.heap_capacity_limit
            )));
        }
        let bytes = capacity
            .checked_mul(2)
            .and_then(|words| words.checked_add(ELEMS_WORD))
            .and_then(|words| words.checked_mul(WORD_SIZE))
            .ok_or_else(|| AllocError::invalid(format!("heap capacity {capacity} overflows")))?;
        let base = bump.alloc(bytes, WORD_SIZE)?;
        arena.store(base, 0)?;
        arena.store(base.add(CAPACITY_WORD * 8), capacity)?;
        Ok(Self {
            arena,
            base,
            capacity,
            len: 0,
        })
    }

    fn slot(&self, i: u64) -> Offset {
        self.base.add((ELEMS_WORD + 2 * i) * 8)
    }

    fn get(&self, i: u64) -> Result<HeapElem, AllocError> {
        let at = self.slot(i);
        Ok(HeapElem {
            id: self.arena.load(at)?,
            weight: self.arena.load(at.add(8))?,
        })
    }

    fn put(&self, i: u64, elem: HeapElem) -> Result<(), AllocError> {
        let at = self.slot(i);
        self.arena.store(at, elem.id)?;
        self.arena.store(at.add(8), elem.weight)
    }

    fn set_len(&mut self, len: u64) -> Result<(), AllocError> {
        self.len = len;
        self.arena.store(self.base.add(SIZE_WORD * 8), len)
    }

    /// Elements currently stored.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the heap holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of elements.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Add an element. `NoSpace` once the heap is full.
    pub fn insert(&mut self, id: u64, weight: u64) -> Result<(), AllocError> {
        if self.len == self.capacity {
            return Err(AllocError::NoSpace {
                capacity: self.capacity,
            });
        }
        let elem = HeapElem { id, weight };
        let mut i = self.len;
        // Each step halves `i`, so the walk ends within 64 steps.
        for _ in 0..u64::BITS {
            if i == 0 {
                break;
            }
            let parent = (i - 1) / 2;
            let up = self.get(parent)?;
            if up.weight <= weight {
                break;
            }
            self.put(i, up)?;
            i = parent;
        }
        self.put(i, elem)?;
        self.set_len(self.len + 1)
    }

    /// Lightest element without removing it.
    pub fn peek(&self) -> Result<Option<HeapElem>, AllocError> {
        if self.len == 0 {
            return Ok(None);
        }
        self.get(0).map(Some)
    }

    /// Remove and return the lightest element. `None` when empty.
    pub fn pop(&mut self) -> Result<Option<HeapElem>, AllocError> {
        if self.len == 0 {
            return Ok(None);
        }
        let top = self.get(0)?;
        let len = self.len - 1;
        self.set_len(len)?;
        if len == 0 {
            return Ok(Some(top));
        }
        let last = self.get(len)?;
        let mut i = 0;
        // Each step at least doubles `i`, so the walk ends within 64 steps.
        for _ in 0..u64::BITS {
            let left = 2 * i + 1;
            if left >= len {
                break;
            }
            let mut child = left;
            let mut down = self.get(left)?;
            if left + 1 < len {
                let right = self.get(left + 1)?;
                if right.weight < down.weight {
                    child = left + 1;
                    down = right;
                }
            }
            if last.weight <= down.weight {
                break;
            }
            self.put(i, down)?;
            i = child;
        }
        self.put(i, last)?;
        Ok(Some(top))
    }
}
