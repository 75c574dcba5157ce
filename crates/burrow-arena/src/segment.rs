//! Arena-resident prealloc segment pages.
//!
//! A [`Segment`] is one arena page laid out as
//!
//! ```text
//! word 0       prev segment offset (NULL at the bottom)
//! word 1       next segment offset (NULL at the top)
//! word 2..512  stacked item offsets
//! ```
//!
//! Segments form a doubly linked list. Every segment below the current top
//! is full; every segment above it is empty and kept as a spare, so the
//! list only ever grows.

use burrow_core::{AllocError, Offset, WordMemory};

use crate::arena::Arena;
use crate::constants::{SEGMENT_CAPACITY, WORD_SIZE};

const PREV: u64 = 0;
const NEXT: u64 = 1;
const ENTRIES: u64 = 2;

/// View over a segment page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Segment(pub(crate) Offset);

impl Segment {
    fn slot(self, word: u64) -> Offset {
        self.0.add(word * WORD_SIZE)
    }

    /// Reset the links of a fresh page.
    pub(crate) fn init(self, arena: &Arena) -> Result<(), AllocError> {
        arena.store(self.slot(PREV), Offset::NULL.0)?;
        arena.store(self.slot(NEXT), Offset::NULL.0)
    }

    pub(crate) fn prev(self, arena: &Arena) -> Result<Offset, AllocError> {
        Ok(Offset(arena.load(self.slot(PREV))?))
    }

    pub(crate) fn set_prev(self, arena: &Arena, prev: Offset) -> Result<(), AllocError> {
        arena.store(self.slot(PREV), prev.0)
    }

    pub(crate) fn next(self, arena: &Arena) -> Result<Offset, AllocError> {
        Ok(Offset(arena.load(self.slot(NEXT))?))
    }

    pub(crate) fn set_next(self, arena: &Arena, next: Offset) -> Result<(), AllocError> {
        arena.store(self.slot(NEXT), next.0)
    }

    pub(crate) fn entry(self, arena: &Arena, i: u64) -> Result<Offset, AllocError> {
        debug_assert!(i < SEGMENT_CAPACITY);
        Ok(Offset(arena.load(self.slot(ENTRIES + i))?))
    }

    pub(crate) fn set_entry(self, arena: &Arena, i: u64, item: Offset) -> Result<(), AllocError> {
        debug_assert!(i < SEGMENT_CAPACITY);
        arena.store(self.slot(ENTRIES + i), item.0)
    }
}

/// Stack state threaded through the segment list.
///
/// Held behind the prealloc stack's lock; every method is O(1).
#[derive(Debug, Default)]
pub(crate) struct SegmentStack {
    /// Segment currently being filled or drained. NULL until the first link.
    pub(crate) top: Offset,
    /// Entries stored in `top`.
    pub(crate) depth: u64,
    /// Entries stored across all segments.
    pub(crate) available: u64,
    /// Segment pages linked so far.
    pub(crate) segments: u64,
}

impl SegmentStack {
    /// Empty slots left across the current and spare segments.
    pub(crate) fn free_slots(&self) -> u64 {
        self.segments * SEGMENT_CAPACITY - self.available
    }

    /// Link a fresh page into the list directly above the top.
    pub(crate) fn link(&mut self, arena: &Arena, page: Offset) -> Result<(), AllocError> {
        let seg = Segment(page);
        seg.init(arena)?;
        if self.top.is_null() {
            self.top = page;
            self.depth = 0;
        } else {
            let top = Segment(self.top);
            let above = top.next(arena)?;
            seg.set_prev(arena, self.top)?;
            seg.set_next(arena, above)?;
            if !above.is_null() {
                Segment(above).set_prev(arena, page)?;
            }
            top.set_next(arena, page)?;
        }
        self.segments += 1;
        Ok(())
    }

    /// Push an item. Returns `false` if every linked segment is full.
    pub(crate) fn push(&mut self, arena: &Arena, item: Offset) -> Result<bool, AllocError> {
        if self.top.is_null() {
            return Ok(false);
        }
        if self.depth == SEGMENT_CAPACITY {
            let above = Segment(self.top).next(arena)?;
            if above.is_null() {
                return Ok(false);
            }
            self.top = above;
            self.depth = 0;
        }
        Segment(self.top).set_entry(arena, self.depth, item)?;
        self.depth += 1;
        self.available += 1;
        Ok(true)
    }

    /// Pop the most recently pushed item.
    pub(crate) fn pop(&mut self, arena: &Arena) -> Result<Option<Offset>, AllocError> {
        if self.available == 0 {
            return Ok(None);
        }
        if self.depth == 0 {
            let below = Segment(self.top).prev(arena)?;
            if below.is_null() {
                return Err(AllocError::integrity(
                    "prealloc stack count is nonzero but no segment holds entries",
                ));
            }
            self.top = below;
            self.depth = SEGMENT_CAPACITY;
        }
        self.depth -= 1;
        self.available -= 1;
        Segment(self.top).entry(arena, self.depth).map(Some)
    }
}
