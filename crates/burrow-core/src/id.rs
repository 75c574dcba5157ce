//! Arena offsets and generation-tagged allocation identifiers.

use std::fmt;

/// Byte offset of an object inside an arena.
///
/// Every reference stored inside an arena is an `Offset`, never a native
/// pointer. Offset zero lies in the arena's reserved first page and is used
/// as the null reference in arena-resident links.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Offset(pub u64);

impl Offset {
    /// The null offset. Never returned by a successful allocation.
    pub const NULL: Offset = Offset(0);

    /// Whether this is the null offset.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The offset `bytes` past this one.
    pub fn add(self, bytes: u64) -> Offset {
        Offset(self.0 + bytes)
    }

    /// Raw byte value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for Offset {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Allocation identifier handed out by the radix allocator.
///
/// `index` locates the slot in the radix tree. `generation` is bumped every
/// time the slot is freed, so two allocations that land on the same index
/// never compare equal. A holder of a stale `Tid` can detect that its
/// object is gone instead of silently addressing the new occupant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid {
    /// Slot index in the radix tree.
    pub index: i32,
    /// Reuse counter for the slot.
    pub generation: i32,
}

impl Tid {
    /// Create a new identifier.
    pub fn new(index: i32, generation: i32) -> Self {
        Self { index, generation }
    }

    /// Pack into one 64-bit word: index in the low half, generation in the high half.
    pub fn to_bits(self) -> u64 {
        (self.index as u32 as u64) | ((self.generation as u32 as u64) << 32)
    }

    /// Inverse of [`Tid::to_bits`].
    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32 as i32,
            generation: (bits >> 32) as u32 as i32,
        }
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}
