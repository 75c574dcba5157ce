//! Burrow: self-managed arena allocation and ordered indexing for
//! constrained runtimes.
//!
//! This is the top-level facade crate that re-exports the public API from
//! all burrow sub-crates. For most users, adding `burrow` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use burrow::prelude::*;
//!
//! let config = ArenaConfig::new(4 << 20);
//! let arena = Arc::new(Arena::new(&config).unwrap());
//!
//! // Generation-tagged slots with 32-byte payloads.
//! let radix = RadixAllocator::new(arena.clone(), &config, 32).unwrap();
//! let slot = radix.alloc().unwrap();
//! radix.free(slot.tid.index).unwrap();
//! assert!(radix.get(slot.tid).is_err());
//!
//! // Variable-size blocks.
//! let buddy = BuddyAllocator::new(arena.clone(), &config).unwrap();
//! let block = buddy.alloc(100).unwrap();
//! buddy.free(block).unwrap();
//!
//! // A sorted index over u64 keys.
//! let bump = Arc::new(StaticAllocator::new(arena.clone(), 4).unwrap());
//! let pool = Arc::new(NodePool::new(arena.clone(), bump.clone()).unwrap());
//! let map = OrderedMap::create(pool).unwrap();
//! map.insert(42, 84, false).unwrap();
//! assert_eq!(map.find(42).unwrap(), 84);
//!
//! // A bounded priority selector.
//! let mut heap = MinHeap::alloc(arena, &bump, &config, 8).unwrap();
//! heap.insert(7, 3).unwrap();
//! assert_eq!(heap.pop().unwrap().map(|e| e.id), Some(7));
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `burrow-core` | Offsets, tids, errors, substrate traits |
//! | [`arena`] | `burrow-arena` | Arena, prealloc stack, radix, buddy and bump allocators |
//! | [`index`] | `burrow-index` | Ordered map, node pool, min-heap |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types, error taxonomy and substrate traits (`burrow-core`).
pub use burrow_core as types;

/// The arena and its allocators (`burrow-arena`).
///
/// [`arena::RadixAllocator`] for fixed-size slots with stable identifiers,
/// [`arena::BuddyAllocator`] for variable-size blocks.
pub use burrow_arena as arena;

/// Arena-resident index structures (`burrow-index`).
pub use burrow_index as index;

/// Common imports for typical burrow usage.
///
/// ```rust
/// use burrow::prelude::*;
/// ```
pub mod prelude {
    // Core types and traits
    pub use burrow_core::{AllocError, Offset, PageSource, Tid, WordMemory};

    // Arena and allocators
    pub use burrow_arena::{
        Arena, ArenaConfig, BuddyAllocator, PreallocStack, RadixAllocator, Slot, StaticAllocator,
    };

    // Index structures
    pub use burrow_index::{HeapElem, MinHeap, NodePool, OrderedMap};
}
