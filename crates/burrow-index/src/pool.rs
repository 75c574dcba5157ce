//! Lock-free node pool.
//!
//! Reclaimed nodes are pushed onto a Treiber stack whose head is a single
//! arena word. The low [`OFFSET_BITS`] bits of the head hold the top node's
//! offset; the upper bits hold a tag bumped on every successful swap, so a
//! head that was popped and pushed back between a load and its
//! compare-and-swap is not mistaken for an unchanged one. A pooled node
//! links to the next one through its parent word.
//!
//! Both ends retry at most [`ALLOC_ATTEMPTS`] times. An allocation that
//! loses every race falls back to the bump allocator; a release that loses
//! every race leaks the node and counts it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use burrow_arena::constants::{ALLOC_ATTEMPTS, OFFSET_BITS, OFFSET_MASK, WORD_SIZE};
use burrow_arena::{Arena, StaticAllocator};
use burrow_core::{AllocError, Offset, WordMemory};

use crate::constants::NODE_BYTES;
use crate::node::Node;

/// Node pool counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Nodes carved fresh from the bump allocator.
    pub fresh: u64,
    /// Nodes reused from the free list.
    pub recycled: u64,
    /// Nodes pushed onto the free list.
    pub released: u64,
    /// Nodes dropped after the release retries ran out.
    pub leaked: u64,
}

/// Shared source of map nodes.
pub struct NodePool {
    arena: Arc<Arena>,
    bump: Arc<StaticAllocator>,
    head: Offset,
    fresh: AtomicU64,
    recycled: AtomicU64,
    released: AtomicU64,
    leaked: AtomicU64,
}

// Compile-time assertion: NodePool must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<NodePool>();
};

fn tagged(offset: Offset, prev_head: u64) -> u64 {
    let tag = (prev_head >> OFFSET_BITS).wrapping_add(1);
    (offset.0 & OFFSET_MASK) | (tag << OFFSET_BITS)
}

impl NodePool {
    /// Create an empty pool. The head word itself comes from `bump`.
    pub fn new(arena: Arc<Arena>, bump: Arc<StaticAllocator>) -> Result<Self, AllocError> {
        let head = bump.alloc(WORD_SIZE, WORD_SIZE)?;
        arena.store(head, 0)?;
        Ok(Self {
            arena,
            bump,
            head,
            fresh: AtomicU64::new(0),
            recycled: AtomicU64::new(0),
            released: AtomicU64::new(0),
            leaked: AtomicU64::new(0),
        })
    }

    /// The arena nodes live in.
    pub fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }

    fn pop(&self) -> Result<Option<Node>, AllocError> {
        for _ in 0..ALLOC_ATTEMPTS {
            let head = self.arena.load(self.head)?;
            let top = Offset(head & OFFSET_MASK);
            if top.is_null() {
                return Ok(None);
            }
            let next = Offset(self.arena.load(Node(top).parent_word())? & OFFSET_MASK);
            if self
                .arena
                .compare_exchange(self.head, head, tagged(next, head))?
                .is_ok()
            {
                return Ok(Some(Node(top)));
            }
        }
        tracing::warn!("node pool pop retries exhausted, falling back to bump");
        Ok(None)
    }

    /// Hand out a zeroed node carrying `flags`.
    pub(crate) fn alloc(&self, flags: u64) -> Result<Node, AllocError> {
        let node = match self.pop()? {
            Some(node) => {
                self.recycled.fetch_add(1, Ordering::Relaxed);
                node
            }
            None => {
                let node = Node(self.bump.alloc(NODE_BYTES, WORD_SIZE)?);
                self.fresh.fetch_add(1, Ordering::Relaxed);
                node
            }
        };
        node.init(&self.arena, flags)?;
        Ok(node)
    }

    /// Return a node to the free list.
    ///
    /// Returns `Ok(())` even when every push attempt loses its race. The
    /// node is then leaked and counted in [`PoolStats::leaked`]; callers
    /// that care watch that counter. Arena errors still propagate.
    pub(crate) fn free(&self, node: Node) -> Result<(), AllocError> {
        for _ in 0..ALLOC_ATTEMPTS {
            let head = self.arena.load(self.head)?;
            node.set_parent(&self.arena, Offset(head & OFFSET_MASK))?;
            if self
                .arena
                .compare_exchange(self.head, head, tagged(node.0, head))?
                .is_ok()
            {
                self.released.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }
        self.leaked.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(node = %node.0, "node pool push retries exhausted, node leaked");
        Ok(())
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            fresh: self.fresh.load(Ordering::Relaxed),
            recycled: self.recycled.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            leaked: self.leaked.load(Ordering::Relaxed),
        }
    }
}
