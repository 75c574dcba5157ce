//! Arena configuration errors.

use std::error::Error;
use std::fmt;

use burrow_core::AllocError;

/// Errors detected during [`ArenaConfig::validate()`](crate::ArenaConfig::validate).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Capacity is zero or not a whole number of pages.
    CapacityNotPageAligned {
        /// The configured capacity in bytes.
        capacity: u64,
    },
    /// Capacity leaves no page besides the reserved null page.
    CapacityTooSmall {
        /// The configured capacity in bytes.
        capacity: u64,
    },
    /// Capacity does not fit in the offset width.
    CapacityTooLarge {
        /// The configured capacity in bytes.
        capacity: u64,
        /// Largest supported capacity.
        max: u64,
    },
    /// Prealloc batch size is zero.
    ZeroBatch,
    /// Buddy minimum block is not a power of two or smaller than a word.
    InvalidMinAlloc {
        /// The configured minimum block size.
        min_alloc: u64,
    },
    /// Buddy chunk size is not a power-of-two number of pages holding at
    /// least two minimum blocks.
    InvalidChunkSize {
        /// The configured chunk size.
        chunk_bytes: u64,
    },
    /// Buddy chunk limit is zero.
    ZeroChunks,
    /// Min-heap capacity limit is zero.
    ZeroHeapLimit,
    /// Min-heap capacity limit could not be backed by any arena.
    HeapLimitTooLarge {
        /// The configured limit.
        limit: u64,
        /// Largest supported limit.
        max: u64,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityNotPageAligned { capacity } => {
                write!(f, "arena capacity {capacity} is not a whole number of pages")
            }
            Self::CapacityTooSmall { capacity } => {
                write!(f, "arena capacity {capacity} leaves no usable page")
            }
            Self::CapacityTooLarge { capacity, max } => {
                write!(f, "arena capacity {capacity} exceeds maximum {max}")
            }
            Self::ZeroBatch => write!(f, "prealloc_batch must be at least 1"),
            Self::InvalidMinAlloc { min_alloc } => {
                write!(
                    f,
                    "buddy_min_alloc {min_alloc} must be a power of two of at least 8 bytes"
                )
            }
            Self::InvalidChunkSize { chunk_bytes } => {
                write!(
                    f,
                    "buddy_chunk_bytes {chunk_bytes} must be a power-of-two number of pages"
                )
            }
            Self::ZeroChunks => write!(f, "buddy_max_chunks must be at least 1"),
            Self::ZeroHeapLimit => write!(f, "heap_capacity_limit must be at least 1"),
            Self::HeapLimitTooLarge { limit, max } => {
                write!(f, "heap_capacity_limit {limit} exceeds maximum {max}")
            }
        }
    }
}

impl Error for ConfigError {}

impl From<ConfigError> for AllocError {
    fn from(e: ConfigError) -> Self {
        AllocError::InvalidArgument {
            reason: e.to_string(),
        }
    }
}
