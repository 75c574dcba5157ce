//! Radix chunk descriptors.
//!
//! A [`Descriptor`] occupies one arena page:
//!
//! ```text
//! words 0..8   occupancy bitmap, one bit per child slot
//! word  8      nr_free: slots whose bit is clear
//! word  9      offset of the chunk page
//! ```
//!
//! The chunk page holds [`RADIX_FANOUT`] offsets. On internal levels these
//! point at child descriptors and a set bit means "that child is full". On
//! the leaf level they point at payload blocks and a set bit means "slot
//! allocated". A payload offset stays in the chunk after the slot is freed,
//! so the next occupant reuses the block and its generation.

use burrow_core::{AllocError, Offset, WordMemory};

use crate::arena::Arena;
use crate::constants::{PAGE_SIZE, RADIX_BITMAP_WORDS, RADIX_FANOUT, WORD_SIZE};

const NR_FREE: u64 = RADIX_BITMAP_WORDS as u64;
const CHUNK: u64 = NR_FREE + 1;

/// View over a descriptor page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Descriptor(pub(crate) Offset);

impl Descriptor {
    fn word(self, w: u64) -> Offset {
        self.0.add(w * WORD_SIZE)
    }

    fn chunk_slot(self, arena: &Arena, pos: usize) -> Result<Offset, AllocError> {
        debug_assert!(pos < RADIX_FANOUT);
        Ok(self.chunk(arena)?.add(pos as u64 * WORD_SIZE))
    }

    /// Initialise a fresh descriptor page pointing at a fresh chunk page.
    pub(crate) fn init(self, arena: &Arena, chunk: Offset) -> Result<(), AllocError> {
        arena.zero(self.0, CHUNK * WORD_SIZE)?;
        arena.zero(chunk, PAGE_SIZE)?;
        arena.store(self.word(NR_FREE), RADIX_FANOUT as u64)?;
        arena.store(self.word(CHUNK), chunk.0)
    }

    pub(crate) fn chunk(self, arena: &Arena) -> Result<Offset, AllocError> {
        Ok(Offset(arena.load(self.word(CHUNK))?))
    }

    pub(crate) fn nr_free(self, arena: &Arena) -> Result<u64, AllocError> {
        arena.load(self.word(NR_FREE))
    }

    pub(crate) fn set_nr_free(self, arena: &Arena, n: u64) -> Result<(), AllocError> {
        arena.store(self.word(NR_FREE), n)
    }

    /// Lowest slot whose bit is clear.
    pub(crate) fn first_free(self, arena: &Arena) -> Result<Option<usize>, AllocError> {
        for w in 0..RADIX_BITMAP_WORDS {
            let bits = arena.load(self.word(w as u64))?;
            if bits != u64::MAX {
                return Ok(Some(w * 64 + (!bits).trailing_zeros() as usize));
            }
        }
        Ok(None)
    }

    pub(crate) fn is_set(self, arena: &Arena, pos: usize) -> Result<bool, AllocError> {
        let bits = arena.load(self.word((pos / 64) as u64))?;
        Ok(bits & (1 << (pos % 64)) != 0)
    }

    pub(crate) fn set(self, arena: &Arena, pos: usize) -> Result<(), AllocError> {
        let at = self.word((pos / 64) as u64);
        arena.store(at, arena.load(at)? | (1 << (pos % 64)))
    }

    pub(crate) fn clear(self, arena: &Arena, pos: usize) -> Result<(), AllocError> {
        let at = self.word((pos / 64) as u64);
        arena.store(at, arena.load(at)? & !(1 << (pos % 64)))
    }

    /// Child descriptor or payload block stored at `pos`. NULL if none yet.
    pub(crate) fn child(self, arena: &Arena, pos: usize) -> Result<Offset, AllocError> {
        Ok(Offset(arena.load(self.chunk_slot(arena, pos)?)?))
    }

    pub(crate) fn set_child(self, arena: &Arena, pos: usize, child: Offset) -> Result<(), AllocError> {
        arena.store(self.chunk_slot(arena, pos)?, child.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::PageSource;

    fn fresh(arena: &Arena) -> Descriptor {
        let desc = Descriptor(arena.alloc_pages(1).unwrap());
        desc.init(arena, arena.alloc_pages(1).unwrap()).unwrap();
        desc
    }

    #[test]
    fn fresh_descriptor_is_empty() {
        let arena = Arena::with_capacity(8 * PAGE_SIZE).unwrap();
        let desc = fresh(&arena);
        assert_eq!(desc.nr_free(&arena).unwrap(), RADIX_FANOUT as u64);
        assert_eq!(desc.first_free(&arena).unwrap(), Some(0));
        assert!(desc.child(&arena, 511).unwrap().is_null());
    }

    #[test]
    fn first_free_skips_full_words() {
        let arena = Arena::with_capacity(8 * PAGE_SIZE).unwrap();
        let desc = fresh(&arena);
        for pos in 0..70 {
            desc.set(&arena, pos).unwrap();
        }
        assert_eq!(desc.first_free(&arena).unwrap(), Some(70));
        desc.clear(&arena, 3).unwrap();
        assert_eq!(desc.first_free(&arena).unwrap(), Some(3));
        assert!(desc.is_set(&arena, 69).unwrap());
        assert!(!desc.is_set(&arena, 3).unwrap());
    }

    #[test]
    fn full_bitmap_has_no_free_slot() {
        let arena = Arena::with_capacity(8 * PAGE_SIZE).unwrap();
        let desc = fresh(&arena);
        for pos in 0..RADIX_FANOUT {
            desc.set(&arena, pos).unwrap();
        }
        assert_eq!(desc.first_free(&arena).unwrap(), None);
    }

    #[test]
    fn children_are_stored_in_the_chunk() {
        let arena = Arena::with_capacity(8 * PAGE_SIZE).unwrap();
        let desc = fresh(&arena);
        desc.set_child(&arena, 511, Offset(0x3000)).unwrap();
        let chunk = desc.chunk(&arena).unwrap();
        assert_eq!(arena.load(chunk.add(511 * 8)).unwrap(), 0x3000);
        assert_eq!(desc.child(&arena, 511).unwrap(), Offset(0x3000));
    }
}
