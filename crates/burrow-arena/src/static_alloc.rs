//! Bump allocator for long-lived arena objects.
//!
//! [`StaticAllocator`] carves aligned regions out of page batches pulled
//! from a [`PageSource`]. Nothing is ever returned to it: structures built
//! on top (map nodes, heap arrays) recycle their memory through their own
//! free lists or live for the lifetime of the arena.

use std::sync::Arc;

use burrow_core::{AllocError, Offset, PageSource};
use parking_lot::Mutex;

use crate::constants::{ALLOC_ATTEMPTS, MAX_ARENA_BYTES, PAGE_SIZE, WORD_SIZE};

/// Bump allocator counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StaticStats {
    /// Bytes handed out, padding excluded.
    pub allocated_bytes: u64,
    /// Pages pulled from the page source.
    pub pages: u64,
}

#[derive(Debug, Default)]
struct BumpState {
    cursor: u64,
    end: u64,
    stats: StaticStats,
}

/// Never-freeing bump allocator.
pub struct StaticAllocator {
    source: Arc<dyn PageSource>,
    batch_pages: u64,
    state: Mutex<BumpState>,
}

// Compile-time assertion: StaticAllocator must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<StaticAllocator>();
};

impl StaticAllocator {
    /// Create an allocator pulling `batch_pages` pages at a time.
    pub fn new(source: Arc<dyn PageSource>, batch_pages: u64) -> Result<Self, AllocError> {
        if batch_pages == 0 {
            return Err(AllocError::invalid("static allocator batch must be at least one page"));
        }
        Ok(Self {
            source,
            batch_pages,
            state: Mutex::new(BumpState::default()),
        })
    }

    /// Allocate `size` bytes aligned to `align`.
    ///
    /// `size` is rounded up to whole words and `align` to at least one
    /// word. Requests larger than a batch get a dedicated page run.
    pub fn alloc(&self, size: u64, align: u64) -> Result<Offset, AllocError> {
        if size == 0 {
            return Err(AllocError::invalid("zero-sized static allocation"));
        }
        if !align.is_power_of_two() || align > PAGE_SIZE {
            return Err(AllocError::invalid(format!(
                "alignment {align} must be a power of two no larger than a page"
            )));
        }
        if size > MAX_ARENA_BYTES {
            return Err(AllocError::OutOfMemory { requested: size });
        }
        let align = align.max(WORD_SIZE);
        let size = size.next_multiple_of(WORD_SIZE);

        for _ in 0..ALLOC_ATTEMPTS {
            {
                let mut st = self.state.lock();
                let start = st.cursor.next_multiple_of(align);
                if st.cursor != 0 && start + size <= st.end {
                    st.cursor = start + size;
                    st.stats.allocated_bytes += size;
                    return Ok(Offset(start));
                }
            }
            let pages = size.div_ceil(PAGE_SIZE).max(self.batch_pages);
            let base = self.source.alloc_pages(pages)?;
            let mut st = self.state.lock();
            st.stats.pages += pages;
            // Another caller may have refilled meanwhile; keep whichever
            // region has more room left.
            let fresh_end = base.0 + pages * PAGE_SIZE;
            if st.cursor == 0 || fresh_end - base.0 > st.end - st.cursor {
                st.cursor = base.0;
                st.end = fresh_end;
            }
            tracing::debug!(pages, base = %base, "static allocator refilled");
        }
        tracing::warn!(size, "static alloc retries exhausted");
        Err(AllocError::OutOfMemory { requested: size })
    }

    /// Counter snapshot.
    pub fn stats(&self) -> StaticStats {
        self.state.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;

    fn allocator(pages: u64, batch: u64) -> StaticAllocator {
        let arena = Arc::new(Arena::with_capacity(pages * PAGE_SIZE).unwrap());
        StaticAllocator::new(arena, batch).unwrap()
    }

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let bump = allocator(16, 2);
        let a = bump.alloc(3, 1).unwrap();
        let b = bump.alloc(8, 64).unwrap();
        let c = bump.alloc(16, 8).unwrap();
        assert_eq!(a.0 % 8, 0);
        assert_eq!(b.0 % 64, 0);
        assert!(b.0 >= a.0 + 8);
        assert_eq!(c.0, b.0 + 8);
        assert_eq!(bump.stats().allocated_bytes, 32);
        assert_eq!(bump.stats().pages, 2);
    }

    #[test]
    fn large_request_gets_its_own_run() {
        let bump = allocator(16, 1);
        let big = bump.alloc(3 * PAGE_SIZE, 8).unwrap();
        assert_eq!(big.0 % PAGE_SIZE, 0);
        assert_eq!(bump.stats().pages, 3);
    }

    #[test]
    fn exhaustion_is_out_of_memory() {
        let bump = allocator(4, 2);
        bump.alloc(2 * PAGE_SIZE, 8).unwrap();
        assert!(matches!(
            bump.alloc(PAGE_SIZE, 8),
            Err(AllocError::OutOfMemory { .. })
        ));
        assert!(matches!(
            bump.alloc(u64::MAX, 8),
            Err(AllocError::OutOfMemory { requested: u64::MAX })
        ));
    }

    #[test]
    fn bad_arguments_rejected() {
        let bump = allocator(4, 1);
        assert!(bump.alloc(0, 8).is_err());
        assert!(bump.alloc(8, 3).is_err());
        assert!(bump.alloc(8, 2 * PAGE_SIZE).is_err());
        assert!(StaticAllocator::new(Arc::new(Arena::with_capacity(2 * PAGE_SIZE).unwrap()), 0).is_err());
    }
}
