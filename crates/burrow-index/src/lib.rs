//! Policy-facing index structures over a burrow arena.
//!
//! - [`OrderedMap`]: a fanout-5 B+tree from `u64` keys to `u64` values,
//!   drawing nodes from a shared lock-free [`NodePool`].
//! - [`MinHeap`]: a fixed-capacity binary min-heap of
//!   [`HeapElem`]s, ordered by weight.
//!
//! Both keep their state in arena words and hand out plain values, never
//! references into the arena.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod constants;
pub mod map;
pub mod minheap;
mod node;
pub mod pool;

pub use map::OrderedMap;
pub use minheap::{HeapElem, MinHeap};
pub use pool::{NodePool, PoolStats};
