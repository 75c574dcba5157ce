//! Fixed-size payload blocks carved from page slabs.
//!
//! Each block is one header word followed by the payload, rounded up to a
//! whole number of words. Slabs are single pages popped from a
//! [`PreallocStack`]; blocks are never returned to the pool, because a
//! radix leaf keeps its block bound to the slot for reuse.

use burrow_core::{AllocError, Offset};

use crate::constants::{PAGE_SIZE, WORD_SIZE};
use crate::prealloc::PreallocStack;

/// Bump pool of equally sized blocks.
#[derive(Debug)]
pub(crate) struct SlabPool {
    elem_size: u64,
    slab: Offset,
    used: u64,
}

impl SlabPool {
    /// Create a pool for payloads of `payload_size` bytes.
    pub(crate) fn new(payload_size: u64) -> Result<Self, AllocError> {
        if payload_size > PAGE_SIZE - WORD_SIZE {
            return Err(AllocError::invalid(format!(
                "payload size {payload_size} exceeds {} bytes",
                PAGE_SIZE - WORD_SIZE
            )));
        }
        Ok(Self {
            elem_size: (WORD_SIZE + payload_size).next_multiple_of(WORD_SIZE),
            slab: Offset::NULL,
            used: PAGE_SIZE,
        })
    }

    /// Bytes per block including the header word.
    pub(crate) fn elem_size(&self) -> u64 {
        self.elem_size
    }

    /// Carve one block, opening a new slab from `stack` when the current
    /// one is exhausted.
    pub(crate) fn alloc(&mut self, stack: &PreallocStack) -> Result<Offset, AllocError> {
        if self.slab.is_null() || self.used + self.elem_size > PAGE_SIZE {
            self.slab = stack.acquire()?;
            self.used = 0;
        }
        let block = self.slab.add(self.used);
        self.used += self.elem_size;
        Ok(block)
    }
}
