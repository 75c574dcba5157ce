//! Arena-resident map nodes.
//!
//! ```text
//! word 0              flags (ROOT, LEAF)
//! word 1              numkeys
//! word 2              parent offset (NULL for the root; free-list link
//!                     while the node sits in the pool)
//! words 3..3+K        keys
//! words 3+K..4+2K     values: child offsets in internal nodes
//! ```
//!
//! Nodes are edited as a [`NodeData`] image: read, change in place,
//! written back whole.

use burrow_core::{AllocError, Offset, WordMemory};

use burrow_arena::Arena;

use crate::constants::{FANOUT, NODE_WORDS};

/// Node is the tree root.
pub(crate) const ROOT: u64 = 1 << 0;
/// Node is a leaf; its values are caller values.
pub(crate) const LEAF: u64 = 1 << 1;

pub(crate) const PARENT_WORD: u64 = 2;
const KEYS_WORD: u64 = 3;
const VALUES_WORD: u64 = KEYS_WORD + FANOUT as u64;

/// Offset of a node in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Node(pub(crate) Offset);

/// In-memory image of one node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct NodeData {
    pub(crate) flags: u64,
    pub(crate) numkeys: usize,
    pub(crate) parent: Offset,
    pub(crate) keys: [u64; FANOUT],
    pub(crate) values: [u64; FANOUT + 1],
}

impl Node {
    fn word(self, w: u64) -> Offset {
        self.0.add(w * 8)
    }

    pub(crate) fn read(self, arena: &Arena) -> Result<NodeData, AllocError> {
        let numkeys = arena.load(self.word(1))? as usize;
        if numkeys > FANOUT {
            return Err(AllocError::integrity(format!(
                "node {} claims {numkeys} keys",
                self.0
            )));
        }
        let mut data = NodeData {
            flags: arena.load(self.word(0))?,
            numkeys,
            parent: Offset(arena.load(self.word(PARENT_WORD))?),
            keys: [0; FANOUT],
            values: [0; FANOUT + 1],
        };
        for (i, k) in data.keys.iter_mut().enumerate() {
            *k = arena.load(self.word(KEYS_WORD + i as u64))?;
        }
        for (i, v) in data.values.iter_mut().enumerate() {
            *v = arena.load(self.word(VALUES_WORD + i as u64))?;
        }
        Ok(data)
    }

    pub(crate) fn write(self, arena: &Arena, data: &NodeData) -> Result<(), AllocError> {
        arena.store(self.word(0), data.flags)?;
        arena.store(self.word(1), data.numkeys as u64)?;
        arena.store(self.word(PARENT_WORD), data.parent.0)?;
        for (i, &k) in data.keys.iter().enumerate() {
            arena.store(self.word(KEYS_WORD + i as u64), k)?;
        }
        for (i, &v) in data.values.iter().enumerate() {
            arena.store(self.word(VALUES_WORD + i as u64), v)?;
        }
        Ok(())
    }

    /// Zero the node and set its flags.
    pub(crate) fn init(self, arena: &Arena, flags: u64) -> Result<(), AllocError> {
        arena.zero(self.0, NODE_WORDS * 8)?;
        arena.store(self.word(0), flags)
    }

    pub(crate) fn flags(self, arena: &Arena) -> Result<u64, AllocError> {
        arena.load(self.word(0))
    }

    pub(crate) fn set_flags(self, arena: &Arena, flags: u64) -> Result<(), AllocError> {
        arena.store(self.word(0), flags)
    }

    pub(crate) fn set_parent(self, arena: &Arena, parent: Offset) -> Result<(), AllocError> {
        arena.store(self.word(PARENT_WORD), parent.0)
    }

    pub(crate) fn parent_word(self) -> Offset {
        self.word(PARENT_WORD)
    }
}

impl NodeData {
    pub(crate) fn is_leaf(&self) -> bool {
        self.flags & LEAF != 0
    }

    pub(crate) fn is_root(&self) -> bool {
        self.flags & ROOT != 0
    }

    pub(crate) fn keys(&self) -> &[u64] {
        &self.keys[..self.numkeys]
    }

    /// Child slot to descend into: first separator strictly greater than `key`.
    pub(crate) fn child_index(&self, key: u64) -> usize {
        self.keys().partition_point(|&k| k <= key)
    }

    /// Leaf slot where `key` is or would be: first key not less than `key`.
    pub(crate) fn leaf_index(&self, key: u64) -> usize {
        self.keys().partition_point(|&k| k < key)
    }

    /// Child offset at slot `i` of an internal node.
    pub(crate) fn child(&self, i: usize) -> Node {
        Node(Offset(self.values[i]))
    }

    /// Slot holding `child`, scanning the live child offsets.
    pub(crate) fn position_of(&self, child: Node) -> Option<usize> {
        self.values[..=self.numkeys]
            .iter()
            .position(|&v| v == child.0 .0)
    }

    /// Insert `key` at `at`, with `value` at value slot `vat`.
    ///
    /// Leaves pass `vat == at`; internal nodes insert a right child, `at + 1`.
    pub(crate) fn insert_at(&mut self, at: usize, key: u64, vat: usize, value: u64) {
        debug_assert!(self.numkeys < FANOUT);
        let n = self.numkeys;
        let vn = if self.is_leaf() { n } else { n + 1 };
        self.keys.copy_within(at..n, at + 1);
        self.keys[at] = key;
        self.values.copy_within(vat..vn, vat + 1);
        self.values[vat] = value;
        self.numkeys += 1;
    }

    /// Remove the key at `at` and the value at `vat`.
    pub(crate) fn remove_at(&mut self, at: usize, vat: usize) {
        debug_assert!(self.numkeys > 0);
        let n = self.numkeys;
        let vn = if self.is_leaf() { n } else { n + 1 };
        self.keys.copy_within(at + 1..n, at);
        self.keys[n - 1] = 0;
        self.values.copy_within(vat + 1..vn, vat);
        self.values[vn - 1] = 0;
        self.numkeys -= 1;
    }
}
