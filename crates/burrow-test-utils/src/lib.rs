//! Test utilities and mock page sources for burrow development.
//!
//! Provides a [`LimitedPageSource`] that wraps an arena with a page budget,
//! so tests can drive allocators into `OutOfMemory` at a chosen point, and
//! [`fixtures`] for small arenas and allocator setups.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::sync::Arc;

use burrow_arena::Arena;
use burrow_core::{AllocError, Offset, PageSource};
use parking_lot::Mutex;

/// Page source that forwards to an arena until a page budget runs out.
///
/// Every reservation that would exceed the remaining budget fails with
/// `OutOfMemory` without touching the arena.
pub struct LimitedPageSource {
    arena: Arc<Arena>,
    state: Mutex<Budget>,
}

struct Budget {
    remaining: u64,
    calls: u64,
    failures: u64,
}

impl LimitedPageSource {
    pub fn new(arena: Arc<Arena>, budget_pages: u64) -> Self {
        Self {
            arena,
            state: Mutex::new(Budget {
                remaining: budget_pages,
                calls: 0,
                failures: 0,
            }),
        }
    }

    /// Grant `pages` more pages of budget.
    pub fn refill(&self, pages: u64) {
        self.state.lock().remaining += pages;
    }

    /// Pages left in the budget.
    pub fn remaining(&self) -> u64 {
        self.state.lock().remaining
    }

    /// Reservations attempted so far.
    pub fn calls(&self) -> u64 {
        self.state.lock().calls
    }

    /// Reservations refused so far.
    pub fn failures(&self) -> u64 {
        self.state.lock().failures
    }
}

impl PageSource for LimitedPageSource {
    fn page_size(&self) -> u64 {
        self.arena.page_size()
    }

    fn alloc_pages(&self, count: u64) -> Result<Offset, AllocError> {
        let mut budget = self.state.lock();
        budget.calls += 1;
        if count > budget.remaining {
            budget.failures += 1;
            return Err(AllocError::OutOfMemory {
                requested: count * self.arena.page_size(),
            });
        }
        let base = self.arena.alloc_pages(count)?;
        budget.remaining -= count;
        Ok(base)
    }
}
