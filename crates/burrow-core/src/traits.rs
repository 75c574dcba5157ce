//! Boundary traits toward the host memory substrate.

use crate::error::AllocError;
use crate::id::Offset;

/// Bulk reservation of fixed-size pages from the host arena.
///
/// This is the only way allocators acquire new backing memory. A call
/// either returns a contiguous run of `count` zeroed pages or fails; it
/// never returns a partial run. Allocators only call it outside their
/// own locks.
pub trait PageSource: Send + Sync {
    /// Size of one page in bytes.
    fn page_size(&self) -> u64;

    /// Reserve `count` contiguous zeroed pages, returning the first page's offset.
    fn alloc_pages(&self, count: u64) -> Result<Offset, AllocError>;

    /// Return pages to the host.
    ///
    /// Burrow never needs this: memory is recycled through free lists and
    /// stays reserved for the lifetime of the arena.
    fn free_pages(&self, _offset: Offset, _count: u64) -> Result<(), AllocError> {
        Err(AllocError::Unsupported { op: "free_pages" })
    }
}

/// Word-granular access to arena memory.
///
/// Offsets are byte offsets and must be 8-byte aligned. Implementations
/// translate the offset and reject anything out of bounds with
/// [`AllocError::InvalidArgument`].
pub trait WordMemory: Send + Sync {
    /// Read the word at `offset`.
    fn load(&self, offset: Offset) -> Result<u64, AllocError>;

    /// Write the word at `offset`.
    fn store(&self, offset: Offset, value: u64) -> Result<(), AllocError>;

    /// Atomically replace `current` with `new` at `offset`.
    ///
    /// Returns `Ok(Ok(previous))` on success and `Ok(Err(actual))` when the
    /// word no longer held `current`.
    fn compare_exchange(
        &self,
        offset: Offset,
        current: u64,
        new: u64,
    ) -> Result<Result<u64, u64>, AllocError>;
}
