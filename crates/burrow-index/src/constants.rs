//! Structural constants for the ordered map.

/// Maximum keys a node holds before it splits.
pub const FANOUT: usize = 5;

/// Minimum keys a non-root internal node keeps after rebalancing.
pub const MIN_KEYS: usize = FANOUT / 2;

/// Bound on tree height. Every descent and upward walk stops here.
pub const MAX_DEPTH: usize = 32;

/// Words in one node: flags, numkeys, parent, `FANOUT` keys, `FANOUT + 1` values.
pub const NODE_WORDS: u64 = 3 + FANOUT as u64 + FANOUT as u64 + 1;

/// Bytes in one node.
pub const NODE_BYTES: u64 = NODE_WORDS * 8;

// Splitting needs room for a key pushed into a full node.
const _: () = assert!(FANOUT >= 3);
