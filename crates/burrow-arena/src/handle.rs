//! Radix allocation handles.
//!
//! A [`Slot`] is what a successful radix allocation hands back: the
//! identifier naming the slot and the offset of its payload. Both are plain
//! values; no reference into the arena escapes.

use std::fmt;

use burrow_core::{AllocError, Offset, Tid};

use crate::constants::WORD_SIZE;

/// A live radix slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[must_use]
pub struct Slot {
    /// Identifier of the slot at the time of allocation.
    pub tid: Tid,
    /// Offset of the first payload byte. Word aligned.
    pub payload: Offset,
}

impl Slot {
    /// Offset of the header word that precedes the payload.
    ///
    /// Fails with `InvalidArgument` when no arena word can precede the
    /// payload, as for a null or first-word payload.
    pub fn header(&self) -> Result<Offset, AllocError> {
        match self.payload.0.checked_sub(WORD_SIZE) {
            Some(at) if at != 0 => Ok(Offset(at)),
            _ => Err(AllocError::invalid(format!(
                "payload {} has no header word",
                self.payload
            ))),
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot(tid={}, payload={})", self.tid, self.payload)
    }
}
