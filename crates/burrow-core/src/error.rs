//! Error taxonomy shared by every burrow allocator and index.
//!
//! All errors are reported synchronously to the immediate caller. None of
//! the operations that return them leave partially applied state behind:
//! a failed operation either never mutated anything or completed its
//! bottom-up propagation before the failure was detected.

use std::error::Error;
use std::fmt;

/// Errors returned by arena, allocator and index operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// The arena, a prealloc stack, or a buddy allocator is exhausted.
    OutOfMemory {
        /// Bytes requested by the failing operation.
        requested: u64,
    },
    /// Insert of a key that is already present without `update`.
    AlreadyExists {
        /// The duplicate key.
        key: u64,
    },
    /// Lookup, find or remove of an absent key, index or stale identifier.
    NotFound,
    /// A bounded container is at capacity.
    NoSpace {
        /// The configured capacity.
        capacity: u64,
    },
    /// An index, size, offset or capacity is outside configured bounds.
    InvalidArgument {
        /// What was wrong with the argument.
        reason: String,
    },
    /// Operation intentionally not implemented in this configuration.
    Unsupported {
        /// Name of the operation.
        op: &'static str,
    },
    /// An internal consistency check failed.
    ///
    /// Unrecoverable for the current operation; never retried.
    IntegrityViolation {
        /// Which check failed.
        reason: String,
    },
}

impl AllocError {
    /// Shorthand for [`AllocError::InvalidArgument`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`AllocError::IntegrityViolation`].
    pub fn integrity(reason: impl Into<String>) -> Self {
        Self::IntegrityViolation {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested } => {
                write!(f, "out of memory: requested {requested} bytes")
            }
            Self::AlreadyExists { key } => write!(f, "key {key} already exists"),
            Self::NotFound => write!(f, "not found"),
            Self::NoSpace { capacity } => write!(f, "no space: capacity {capacity} reached"),
            Self::InvalidArgument { reason } => write!(f, "invalid argument: {reason}"),
            Self::Unsupported { op } => write!(f, "operation '{op}' is not supported"),
            Self::IntegrityViolation { reason } => write!(f, "integrity violation: {reason}"),
        }
    }
}

impl Error for AllocError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_details() {
        let e = AllocError::OutOfMemory { requested: 4096 };
        assert_eq!(e.to_string(), "out of memory: requested 4096 bytes");
        let e = AllocError::Unsupported { op: "free_pages" };
        assert!(e.to_string().contains("free_pages"));
    }

    #[test]
    fn helpers_build_string_variants() {
        assert_eq!(
            AllocError::invalid("bad"),
            AllocError::InvalidArgument {
                reason: "bad".into()
            }
        );
        assert!(matches!(
            AllocError::integrity("x"),
            AllocError::IntegrityViolation { .. }
        ));
    }
}
