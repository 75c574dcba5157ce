//! Segmented preallocation stack.
//!
//! [`PreallocStack`] decouples bulk page reservation from fine-grained
//! allocation. Callers [`reserve`](PreallocStack::reserve) the worst-case
//! number of items an operation could need *before* starting it; the
//! operation then pops items with [`acquire`](PreallocStack::acquire) in
//! O(1) and never has to reach for the page source midway.
//!
//! The stack lock guards only the O(1) push/pop/link step. Bulk
//! reservations always happen with the lock released.

use std::sync::Arc;

use burrow_core::{AllocError, Offset, PageSource};
use parking_lot::Mutex;

use crate::arena::Arena;
use crate::constants::{ALLOC_ATTEMPTS, PAGE_SIZE, SEGMENT_CAPACITY};
use crate::segment::SegmentStack;

/// Snapshot of prealloc stack counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PreallocStats {
    /// Items ready to be acquired.
    pub available: u64,
    /// Segment pages linked into the stack.
    pub segments: u64,
    /// Bulk top-ups performed by `reserve`.
    pub topups: u64,
}

#[derive(Debug, Default)]
struct StackState {
    stack: SegmentStack,
    topups: u64,
}

/// A stack of preallocated, fixed-size arena items.
///
/// Every item is `item_pages` contiguous pages. The radix allocator uses
/// single-page items for descriptors, chunks and payload slabs; the buddy
/// allocator uses whole-chunk items.
pub struct PreallocStack {
    arena: Arc<Arena>,
    source: Arc<dyn PageSource>,
    item_pages: u64,
    batch: u64,
    state: Mutex<StackState>,
}

impl PreallocStack {
    /// Create an empty stack drawing from `source`.
    pub fn new(
        arena: Arc<Arena>,
        source: Arc<dyn PageSource>,
        item_pages: u64,
        batch: u64,
    ) -> Result<Self, AllocError> {
        if item_pages == 0 {
            return Err(AllocError::invalid("prealloc item must span at least one page"));
        }
        if batch == 0 {
            return Err(AllocError::invalid("prealloc batch must be at least 1"));
        }
        Ok(Self {
            arena,
            source,
            item_pages,
            batch,
            state: Mutex::new(StackState::default()),
        })
    }

    /// Create a stack that reserves pages straight from `arena`.
    pub fn for_arena(arena: Arc<Arena>, item_pages: u64, batch: u64) -> Result<Self, AllocError> {
        let source: Arc<dyn PageSource> = arena.clone();
        Self::new(arena, source, item_pages, batch)
    }

    /// Size of one item in bytes.
    pub fn item_bytes(&self) -> u64 {
        self.item_pages * PAGE_SIZE
    }

    /// Ensure at least `n` items are available.
    ///
    /// Pulls `max(shortfall, batch)` items from the page source in a single
    /// all-or-nothing reservation, together with any segment pages needed
    /// to hold them. Fails with `OutOfMemory` if the source cannot supply
    /// the batch; the stack is unchanged in that case.
    pub fn reserve(&self, n: u64) -> Result<(), AllocError> {
        for _ in 0..ALLOC_ATTEMPTS {
            let (available, free_slots) = {
                let st = self.state.lock();
                (st.stack.available, st.stack.free_slots())
            };
            if available >= n {
                return Ok(());
            }
            let want = (n - available).max(self.batch);
            let seg_pages = want.saturating_sub(free_slots).div_ceil(SEGMENT_CAPACITY);
            let item_span = want * self.item_pages;
            let base = self.source.alloc_pages(item_span + seg_pages)?;

            let mut overflow = Vec::new();
            {
                let mut st = self.state.lock();
                for i in 0..seg_pages {
                    let page = base.add((item_span + i) * PAGE_SIZE);
                    st.stack.link(&self.arena, page)?;
                }
                for i in 0..want {
                    let item = base.add(i * self.item_pages * PAGE_SIZE);
                    if !st.stack.push(&self.arena, item)? {
                        overflow.push(item);
                    }
                }
                st.topups += 1;
                tracing::debug!(
                    items = want,
                    segment_pages = seg_pages,
                    available = st.stack.available,
                    "prealloc stack topped up"
                );
            }
            // A concurrent release filled the slots we sized for; extend
            // the list the slow way.
            for item in overflow {
                self.push_or_extend(item)?;
            }
        }
        tracing::warn!(requested = n, "prealloc reserve retries exhausted");
        Err(AllocError::OutOfMemory {
            requested: n * self.item_bytes(),
        })
    }

    /// Pop one item in O(1).
    ///
    /// Fails with `OutOfMemory` if the stack is empty; callers are expected
    /// to have reserved beforehand.
    pub fn acquire(&self) -> Result<Offset, AllocError> {
        let mut st = self.state.lock();
        st.stack
            .pop(&self.arena)?
            .ok_or(AllocError::OutOfMemory {
                requested: self.item_bytes(),
            })
    }

    /// Push one item back.
    ///
    /// If every segment is full the list is extended with a freshly
    /// reserved page, taken with the lock released.
    pub fn release(&self, item: Offset) -> Result<(), AllocError> {
        if item.is_null() || item.0 % PAGE_SIZE != 0 {
            return Err(AllocError::invalid(format!(
                "released item {item} is not page aligned"
            )));
        }
        self.push_or_extend(item)
    }

    fn push_or_extend(&self, item: Offset) -> Result<(), AllocError> {
        for _ in 0..ALLOC_ATTEMPTS {
            if self.state.lock().stack.push(&self.arena, item)? {
                return Ok(());
            }
            let page = self.source.alloc_pages(1)?;
            self.state.lock().stack.link(&self.arena, page)?;
        }
        Err(AllocError::integrity("prealloc segment extension retries exhausted"))
    }

    /// Items ready to be acquired.
    pub fn available(&self) -> u64 {
        self.state.lock().stack.available
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PreallocStats {
        let st = self.state.lock();
        PreallocStats {
            available: st.stack.available,
            segments: st.stack.segments,
            topups: st.topups,
        }
    }
}
