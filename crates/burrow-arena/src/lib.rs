//! Offset-addressed arena and the allocators built on it.
//!
//! Everything here lives inside one fixed-capacity [`Arena`] and refers to
//! other arena objects only by [`Offset`](burrow_core::Offset). No
//! allocation path reserves new pages while holding a short-held lock:
//! bulk reservation happens up front, through a [`PreallocStack`].
//!
//! # Architecture
//!
//! ```text
//! Arena (PageSource + WordMemory)
//! ├── PreallocStack ─ segment pages of preallocated item offsets
//! │   ├── RadixAllocator ─ 3-level, 512-way descriptor tree → payload slabs
//! │   └── BuddyAllocator ─ power-of-two blocks within 1 MiB chunks
//! └── StaticAllocator ─ never-freeing bump allocator
//! ```
//!
//! Every loop over tree depth, segment entries, chunk count or retries is
//! bounded by a constant in [`constants`].

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod arena;
pub mod buddy;
pub mod config;
pub mod constants;
mod descriptor;
pub mod error;
pub mod handle;
mod pool;
pub mod prealloc;
pub mod radix;
mod segment;
pub mod static_alloc;

// Public re-exports for the primary API surface.
pub use arena::Arena;
pub use buddy::{BuddyAllocator, BuddyStats};
pub use config::ArenaConfig;
pub use error::ConfigError;
pub use handle::Slot;
pub use prealloc::{PreallocStack, PreallocStats};
pub use radix::{RadixAllocator, RadixStats};
pub use static_alloc::{StaticAllocator, StaticStats};
