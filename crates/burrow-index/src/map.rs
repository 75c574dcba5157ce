//! Arena-resident ordered map.
//!
//! [`OrderedMap`] is a B+tree over `u64` keys with [`FANOUT`]-key nodes.
//! Internal nodes route with separators, ties going right; leaves hold
//! the caller's values. Node memory comes from a shared [`NodePool`].
//!
//! Insert splits a node the moment it reaches [`FANOUT`] keys and pushes
//! the split upward. Every node such a cascade could need is taken from
//! the pool before the tree is touched, so an `OutOfMemory` never leaves a
//! half-split tree behind.
//!
//! Remove deletes the leaf entry. Leaves are not rebalanced; a leaf that
//! becomes empty is unlinked from its parent and recycled. Internal nodes
//! that drop below [`MIN_KEYS`] borrow from a sibling or merge with one,
//! and the check walks up to the root. An internal root left with no keys
//! hands the root role to its only child.

use std::sync::Arc;

use burrow_arena::Arena;
use burrow_core::{AllocError, Offset};
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::constants::{FANOUT, MAX_DEPTH, MIN_KEYS};
use crate::node::{Node, NodeData, LEAF, ROOT};
use crate::pool::NodePool;

struct MapState {
    root: Node,
    len: u64,
    nodes: u64,
}

/// Sorted `u64 → u64` map stored in the arena.
pub struct OrderedMap {
    arena: Arc<Arena>,
    pool: Arc<NodePool>,
    state: RwLock<MapState>,
}

// Compile-time assertion: OrderedMap must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<OrderedMap>();
};

impl OrderedMap {
    /// Create an empty map whose root is a single leaf.
    pub fn create(pool: Arc<NodePool>) -> Result<Self, AllocError> {
        let arena = pool.arena().clone();
        let root = pool.alloc(ROOT | LEAF)?;
        Ok(Self {
            arena,
            pool,
            state: RwLock::new(MapState {
                root,
                len: 0,
                nodes: 1,
            }),
        })
    }

    /// Number of entries.
    pub fn len(&self) -> u64 {
        self.state.read().len
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nodes currently linked into the tree.
    pub fn node_count(&self) -> u64 {
        self.state.read().nodes
    }

    fn find_leaf(&self, root: Node, key: u64) -> Result<(Node, NodeData), AllocError> {
        let mut node = root;
        for _ in 0..MAX_DEPTH {
            let data = node.read(&self.arena)?;
            if data.is_leaf() {
                return Ok((node, data));
            }
            node = data.child(data.child_index(key));
        }
        Err(AllocError::integrity(format!(
            "descent for key {key} exceeded depth {MAX_DEPTH}"
        )))
    }

    /// Value stored under `key`.
    pub fn find(&self, key: u64) -> Result<u64, AllocError> {
        let st = self.state.read();
        let (_, leaf) = self.find_leaf(st.root, key)?;
        let at = leaf.leaf_index(key);
        if at < leaf.numkeys && leaf.keys[at] == key {
            Ok(leaf.values[at])
        } else {
            Err(AllocError::NotFound)
        }
    }

    /// Insert `key → value`.
    ///
    /// An existing key is overwritten when `update` is set and rejected
    /// with `AlreadyExists` otherwise.
    pub fn insert(&self, key: u64, value: u64, update: bool) -> Result<(), AllocError> {
        let mut st = self.state.write();
        let (leaf, mut data) = self.find_leaf(st.root, key)?;
        let at = data.leaf_index(key);
        if at < data.numkeys && data.keys[at] == key {
            if !update {
                return Err(AllocError::AlreadyExists { key });
            }
            data.values[at] = value;
            return leaf.write(&self.arena, &data);
        }

        let mut spares = self.reserve_split_nodes(&data)?;
        data.insert_at(at, key, at, value);
        if data.numkeys < FANOUT {
            leaf.write(&self.arena, &data)?;
            st.len += 1;
            return Ok(());
        }

        // Leaf split: the upper half moves right, its first key goes up.
        let right = spares.pop().ok_or_else(|| spare_missing("leaf split"))?;
        let mut rdata = right.read(&self.arena)?;
        let half = FANOUT / 2;
        let moved = FANOUT - half;
        rdata.flags = LEAF;
        rdata.parent = data.parent;
        rdata.numkeys = moved;
        rdata.keys[..moved].copy_from_slice(&data.keys[half..]);
        rdata.values[..moved].copy_from_slice(&data.values[half..FANOUT]);
        data.keys[half..].fill(0);
        data.values[half..].fill(0);
        data.numkeys = half;
        let separator = rdata.keys[0];
        leaf.write(&self.arena, &data)?;
        right.write(&self.arena, &rdata)?;
        st.nodes += 1;

        self.insert_into_parent(&mut st, &mut spares, leaf, separator, right)?;
        st.len += 1;
        Ok(())
    }

    /// Take from the pool every node the split cascade for an insert into
    /// the leaf `data` could need.
    fn reserve_split_nodes(&self, data: &NodeData) -> Result<SmallVec<[Node; 8]>, AllocError> {
        let mut need = 0;
        let mut numkeys = data.numkeys;
        let mut parent = data.parent;
        let mut is_root = data.is_root();
        for _ in 0..MAX_DEPTH {
            if numkeys + 1 < FANOUT {
                break;
            }
            need += 1;
            if is_root {
                need += 1;
                break;
            }
            let up = Node(parent).read(&self.arena)?;
            numkeys = up.numkeys;
            parent = up.parent;
            is_root = up.is_root();
        }

        let mut spares = SmallVec::new();
        for _ in 0..need {
            match self.pool.alloc(0) {
                Ok(n) => spares.push(n),
                Err(e) => {
                    for n in spares {
                        self.pool.free(n)?;
                    }
                    tracing::warn!(error = %e, "map insert could not reserve split nodes");
                    return Err(e);
                }
            }
        }
        Ok(spares)
    }

    fn insert_into_parent(
        &self,
        st: &mut MapState,
        spares: &mut SmallVec<[Node; 8]>,
        mut left: Node,
        mut separator: u64,
        mut right: Node,
    ) -> Result<(), AllocError> {
        for _ in 0..MAX_DEPTH {
            let ldata = left.read(&self.arena)?;
            if ldata.is_root() {
                let root = spares.pop().ok_or_else(|| spare_missing("root split"))?;
                let mut rdata = root.read(&self.arena)?;
                rdata.flags = ROOT;
                rdata.parent = Offset::NULL;
                rdata.numkeys = 1;
                rdata.keys[0] = separator;
                rdata.values[0] = left.0 .0;
                rdata.values[1] = right.0 .0;
                root.write(&self.arena, &rdata)?;
                left.set_flags(&self.arena, ldata.flags & !ROOT)?;
                left.set_parent(&self.arena, root.0)?;
                right.set_parent(&self.arena, root.0)?;
                st.root = root;
                st.nodes += 1;
                tracing::debug!(root = %root.0, "map grew a level");
                return self.release_spares(spares);
            }

            let parent = Node(ldata.parent);
            let mut pdata = parent.read(&self.arena)?;
            let at = pdata
                .position_of(left)
                .ok_or_else(|| orphan(left, parent))?;
            pdata.insert_at(at, separator, at + 1, right.0 .0);
            right.set_parent(&self.arena, parent.0)?;
            if pdata.numkeys < FANOUT {
                parent.write(&self.arena, &pdata)?;
                return self.release_spares(spares);
            }

            // Internal split: the middle key goes up and belongs to neither half.
            let sibling = spares.pop().ok_or_else(|| spare_missing("internal split"))?;
            let mut sdata = sibling.read(&self.arena)?;
            let mid = FANOUT / 2;
            let moved = FANOUT - mid - 1;
            sdata.flags = 0;
            sdata.parent = pdata.parent;
            sdata.numkeys = moved;
            sdata.keys[..moved].copy_from_slice(&pdata.keys[mid + 1..]);
            sdata.values[..=moved].copy_from_slice(&pdata.values[mid + 1..]);
            separator = pdata.keys[mid];
            pdata.keys[mid..].fill(0);
            pdata.values[mid + 1..].fill(0);
            pdata.numkeys = mid;
            parent.write(&self.arena, &pdata)?;
            sibling.write(&self.arena, &sdata)?;
            for i in 0..=moved {
                sdata.child(i).set_parent(&self.arena, sibling.0)?;
            }
            st.nodes += 1;
            left = parent;
            right = sibling;
        }
        Err(AllocError::integrity(format!(
            "split propagation exceeded depth {MAX_DEPTH}"
        )))
    }

    fn release_spares(&self, spares: &mut SmallVec<[Node; 8]>) -> Result<(), AllocError> {
        for n in spares.drain(..) {
            self.pool.free(n)?;
        }
        Ok(())
    }

    /// Remove `key`, returning its value.
    pub fn remove(&self, key: u64) -> Result<u64, AllocError> {
        let mut st = self.state.write();
        let (leaf, mut data) = self.find_leaf(st.root, key)?;
        let at = data.leaf_index(key);
        if at >= data.numkeys || data.keys[at] != key {
            return Err(AllocError::NotFound);
        }
        let value = data.values[at];
        data.remove_at(at, at);
        leaf.write(&self.arena, &data)?;
        st.len -= 1;
        if data.numkeys > 0 || data.is_root() {
            return Ok(value);
        }

        // Unlink the emptied leaf from its parent.
        let parent = Node(data.parent);
        let mut pdata = parent.read(&self.arena)?;
        let ci = pdata
            .position_of(leaf)
            .ok_or_else(|| orphan(leaf, parent))?;
        if ci == 0 {
            pdata.remove_at(0, 0);
        } else {
            pdata.remove_at(ci - 1, ci);
        }
        parent.write(&self.arena, &pdata)?;
        self.pool.free(leaf)?;
        st.nodes -= 1;

        self.rebalance(&mut st, parent)?;
        Ok(value)
    }

    /// Restore minimum occupancy from `node` upward.
    fn rebalance(&self, st: &mut MapState, mut node: Node) -> Result<(), AllocError> {
        for _ in 0..MAX_DEPTH {
            let mut data = node.read(&self.arena)?;
            if data.is_root() {
                if !data.is_leaf() && data.numkeys == 0 {
                    let child = data.child(0);
                    let flags = child.flags(&self.arena)?;
                    child.set_flags(&self.arena, flags | ROOT)?;
                    child.set_parent(&self.arena, Offset::NULL)?;
                    st.root = child;
                    st.nodes -= 1;
                    self.pool.free(node)?;
                    tracing::debug!(root = %child.0, "map lost a level");
                }
                return Ok(());
            }
            if data.numkeys >= MIN_KEYS {
                return Ok(());
            }

            let parent = Node(data.parent);
            let mut pdata = parent.read(&self.arena)?;
            let ci = pdata
                .position_of(node)
                .ok_or_else(|| orphan(node, parent))?;
            let left = (ci > 0).then(|| pdata.child(ci - 1));
            let right = (ci < pdata.numkeys).then(|| pdata.child(ci + 1));

            if let Some(left) = left {
                let mut ldata = left.read(&self.arena)?;
                if ldata.numkeys > MIN_KEYS {
                    // Rotate right through the parent separator.
                    let ln = ldata.numkeys;
                    let moved = ldata.child(ln);
                    data.insert_at(0, pdata.keys[ci - 1], 0, moved.0 .0);
                    pdata.keys[ci - 1] = ldata.keys[ln - 1];
                    ldata.remove_at(ln - 1, ln);
                    moved.set_parent(&self.arena, node.0)?;
                    left.write(&self.arena, &ldata)?;
                    node.write(&self.arena, &data)?;
                    return parent.write(&self.arena, &pdata);
                }
            }
            if let Some(right) = right {
                let mut rdata = right.read(&self.arena)?;
                if rdata.numkeys > MIN_KEYS {
                    // Rotate left through the parent separator.
                    let n = data.numkeys;
                    let moved = rdata.child(0);
                    data.insert_at(n, pdata.keys[ci], n + 1, moved.0 .0);
                    pdata.keys[ci] = rdata.keys[0];
                    rdata.remove_at(0, 0);
                    moved.set_parent(&self.arena, node.0)?;
                    right.write(&self.arena, &rdata)?;
                    node.write(&self.arena, &data)?;
                    return parent.write(&self.arena, &pdata);
                }
            }

            // Neither sibling can spare a key: merge the right node of the
            // pair into the left one, pulling the separator down.
            let (dst, src, sep_at) = match (left, right) {
                (Some(left), _) => (left, node, ci - 1),
                (None, Some(right)) => (node, right, ci),
                (None, None) => {
                    return Err(AllocError::integrity(format!(
                        "internal node {} has no sibling",
                        node.0
                    )))
                }
            };
            let mut ddata = dst.read(&self.arena)?;
            let sdata = src.read(&self.arena)?;
            let dn = ddata.numkeys;
            let sn = sdata.numkeys;
            if dn + 1 + sn >= FANOUT {
                return Err(AllocError::integrity(format!(
                    "merging {} into {} would overflow",
                    src.0, dst.0
                )));
            }
            ddata.keys[dn] = pdata.keys[sep_at];
            ddata.keys[dn + 1..dn + 1 + sn].copy_from_slice(sdata.keys());
            ddata.values[dn + 1..dn + 2 + sn].copy_from_slice(&sdata.values[..=sn]);
            ddata.numkeys = dn + 1 + sn;
            for i in 0..=sn {
                sdata.child(i).set_parent(&self.arena, dst.0)?;
            }
            dst.write(&self.arena, &ddata)?;
            pdata.remove_at(sep_at, sep_at + 1);
            parent.write(&self.arena, &pdata)?;
            self.pool.free(src)?;
            st.nodes -= 1;
            node = parent;
        }
        Err(AllocError::integrity(format!(
            "rebalance exceeded depth {MAX_DEPTH}"
        )))
    }

    /// Levels from the root down to the leaves. A lone root leaf is depth 1.
    pub fn depth(&self) -> Result<usize, AllocError> {
        let st = self.state.read();
        let mut node = st.root;
        for depth in 1..=MAX_DEPTH {
            let data = node.read(&self.arena)?;
            if data.is_leaf() {
                return Ok(depth);
            }
            node = data.child(0);
        }
        Err(AllocError::integrity(format!(
            "tree deeper than {MAX_DEPTH}"
        )))
    }

    /// Visit every node depth-first, children left to right.
    fn walk(
        &self,
        st: &MapState,
        mut visit: impl FnMut(Node, &NodeData) -> Result<(), AllocError>,
    ) -> Result<(), AllocError> {
        let mut stack: SmallVec<[Node; 32]> = SmallVec::new();
        stack.push(st.root);
        let mut visited = 0;
        while let Some(node) = stack.pop() {
            visited += 1;
            if visited > st.nodes {
                return Err(AllocError::integrity(format!(
                    "walk visited more than the {} linked nodes",
                    st.nodes
                )));
            }
            let data = node.read(&self.arena)?;
            visit(node, &data)?;
            if !data.is_leaf() {
                for i in (0..=data.numkeys).rev() {
                    stack.push(data.child(i));
                }
            }
        }
        Ok(())
    }

    /// All entries in ascending key order.
    pub fn entries(&self) -> Result<Vec<(u64, u64)>, AllocError> {
        let st = self.state.read();
        let mut out = Vec::with_capacity(st.len as usize);
        self.walk(&st, |_, data| {
            if data.is_leaf() {
                out.extend(data.keys().iter().copied().zip(data.values.iter().copied()));
            }
            Ok(())
        })?;
        Ok(out)
    }

    /// Check every structural invariant, failing on the first violation.
    ///
    /// Keys strictly increase within a node and stay inside the range their
    /// separators allow; parent links and flags are consistent; all leaves
    /// sit at the same depth; non-root internal nodes hold at least
    /// [`MIN_KEYS`] keys; non-root leaves are never empty; counts match.
    pub fn check_invariants(&self) -> Result<(), AllocError> {
        let st = self.state.read();
        // (node, parent, lower bound, upper bound, depth)
        let mut stack: SmallVec<[(Node, Offset, Option<u64>, Option<u64>, usize); 32]> =
            SmallVec::new();
        stack.push((st.root, Offset::NULL, None, None, 1));
        let mut leaf_depth = None;
        let mut entries = 0;
        let mut nodes = 0;
        let mut last_key: Option<u64> = None;
        let fail = |node: Node, what: &str| {
            Err(AllocError::integrity(format!("node {}: {what}", node.0)))
        };

        while let Some((node, parent, lo, hi, depth)) = stack.pop() {
            nodes += 1;
            if nodes > st.nodes || depth > MAX_DEPTH {
                return fail(node, "tree larger than its node count");
            }
            let data = node.read(&self.arena)?;
            if data.parent != parent {
                return fail(node, "parent link mismatch");
            }
            if data.is_root() != (node == st.root) {
                return fail(node, "ROOT flag mismatch");
            }
            let keys = data.keys();
            if keys.windows(2).any(|w| w[0] >= w[1]) {
                return fail(node, "keys not strictly increasing");
            }
            if keys.iter().any(|&k| lo.is_some_and(|lo| k < lo) || hi.is_some_and(|hi| k >= hi)) {
                return fail(node, "key outside separator range");
            }
            if data.is_leaf() {
                if !data.is_root() && data.numkeys == 0 {
                    return fail(node, "empty non-root leaf");
                }
                if *leaf_depth.get_or_insert(depth) != depth {
                    return fail(node, "leaves at different depths");
                }
                for &k in keys {
                    if last_key.is_some_and(|last| last >= k) {
                        return fail(node, "leaf order broken");
                    }
                    last_key = Some(k);
                }
                entries += data.numkeys as u64;
            } else {
                if data.is_root() && data.numkeys == 0 {
                    return fail(node, "internal root without keys");
                }
                if !data.is_root() && data.numkeys < MIN_KEYS {
                    return fail(node, "internal node below minimum occupancy");
                }
                for i in (0..=data.numkeys).rev() {
                    let clo = if i == 0 { lo } else { Some(keys[i - 1]) };
                    let chi = if i == data.numkeys { hi } else { Some(keys[i]) };
                    stack.push((data.child(i), node.0, clo, chi, depth + 1));
                }
            }
        }
        if entries != st.len {
            return Err(AllocError::integrity(format!(
                "leaves hold {entries} entries but the map counts {}",
                st.len
            )));
        }
        if nodes != st.nodes {
            return Err(AllocError::integrity(format!(
                "reached {nodes} nodes but the map counts {}",
                st.nodes
            )));
        }
        Ok(())
    }

    /// Return every node to the pool.
    pub fn destroy(self) -> Result<(), AllocError> {
        let st = self.state.read();
        let mut nodes: Vec<Node> = Vec::with_capacity(st.nodes as usize);
        self.walk(&st, |node, _| {
            nodes.push(node);
            Ok(())
        })?;
        for node in nodes {
            self.pool.free(node)?;
        }
        tracing::debug!(nodes = st.nodes, "map destroyed");
        Ok(())
    }
}

fn spare_missing(step: &str) -> AllocError {
    AllocError::integrity(format!("{step} found no reserved node"))
}

fn orphan(child: Node, parent: Node) -> AllocError {
    AllocError::integrity(format!(
        "node {} is not a child of its parent {}",
        child.0, parent.0
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_arena::constants::PAGE_SIZE;
    use burrow_arena::StaticAllocator;

    fn map() -> OrderedMap {
        let arena = Arc::new(Arena::with_capacity(256 * PAGE_SIZE).unwrap());
        let bump = Arc::new(StaticAllocator::new(arena.clone(), 4).unwrap());
        OrderedMap::create(Arc::new(NodePool::new(arena, bump).unwrap())).unwrap()
    }

    fn keys(map: &OrderedMap) -> Vec<u64> {
        map.entries().unwrap().into_iter().map(|(k, _)| k).collect()
    }

    #[test]
    fn empty_map_finds_nothing() {
        let map = map();
        assert_eq!(map.find(1), Err(AllocError::NotFound));
        assert_eq!(map.remove(1), Err(AllocError::NotFound));
        assert!(map.is_empty());
        assert_eq!(map.depth().unwrap(), 1);
        map.check_invariants().unwrap();
    }

    #[test]
    fn fanout_plus_one_keys_split_once() {
        let map = map();
        for k in 1..=FANOUT as u64 + 1 {
            map.insert(k, k * 100, false).unwrap();
        }
        assert_eq!(map.depth().unwrap(), 2);
        assert_eq!(map.node_count(), 3);
        let st = map.state.read();
        let root = st.root.read(&map.arena).unwrap();
        assert_eq!(root.keys(), &[3]);
        let left = root.child(0).read(&map.arena).unwrap();
        let right = root.child(1).read(&map.arena).unwrap();
        assert_eq!(left.keys(), &[1, 2]);
        assert_eq!(right.keys(), &[3, 4, 5, 6]);
        assert_eq!(right.values[..4], [300, 400, 500, 600]);
        assert!(!left.is_root() && !right.is_root());
        drop(st);
        map.check_invariants().unwrap();
    }

    #[test]
    fn failed_split_leaves_len_unchanged() {
        let map = map();
        for k in 1..=FANOUT as u64 + 1 {
            map.insert(k, k, false).unwrap();
        }
        {
            // Point the full right leaf at its sibling so the split cannot
            // find itself in the parent.
            let st = map.state.read();
            let root = st.root.read(&map.arena).unwrap();
            root.child(1)
                .set_parent(&map.arena, root.child(0).0)
                .unwrap();
        }
        assert!(matches!(
            map.insert(7, 7, false),
            Err(AllocError::IntegrityViolation { .. })
        ));
        assert_eq!(map.len(), FANOUT as u64 + 1);
    }

    #[test]
    fn duplicate_insert_respects_update_flag() {
        let map = map();
        map.insert(7, 1, false).unwrap();
        assert_eq!(
            map.insert(7, 2, false),
            Err(AllocError::AlreadyExists { key: 7 })
        );
        assert_eq!(map.find(7).unwrap(), 1);
        map.insert(7, 3, true).unwrap();
        assert_eq!(map.find(7).unwrap(), 3);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn key_zero_is_stored_like_any_other() {
        let map = map();
        map.insert(0, 11, false).unwrap();
        map.insert(5, 55, false).unwrap();
        assert_eq!(map.find(0).unwrap(), 11);
        assert_eq!(map.remove(0).unwrap(), 11);
        assert_eq!(map.find(0), Err(AllocError::NotFound));
        map.check_invariants().unwrap();
    }

    #[test]
    fn deep_tree_collapses_back_to_a_leaf() {
        let map = map();
        for k in 0..200 {
            map.insert(k, k, false).unwrap();
        }
        assert!(map.depth().unwrap() >= 3);
        map.check_invariants().unwrap();
        for k in 0..200 {
            assert_eq!(map.remove(k).unwrap(), k);
            map.check_invariants().unwrap();
        }
        assert_eq!(map.depth().unwrap(), 1);
        assert_eq!(map.node_count(), 1);
    }

    #[test]
    fn removing_from_the_right_end_rebalances() {
        let map = map();
        for k in 0..200 {
            map.insert(k, k, false).unwrap();
        }
        for k in (0..200).rev() {
            map.remove(k).unwrap();
            map.check_invariants().unwrap();
        }
        assert!(map.is_empty());
    }

    #[test]
    fn entries_are_sorted() {
        let map = map();
        for k in [9, 2, 7, 4, 1, 8, 3, 6, 5] {
            map.insert(k, k * 2, false).unwrap();
        }
        assert_eq!(keys(&map), (1..=9).collect::<Vec<_>>());
        assert_eq!(map.entries().unwrap()[0], (1, 2));
    }

    #[test]
    fn destroy_returns_nodes_to_the_pool() {
        let map = map();
        for k in 0..50 {
            map.insert(k, k, false).unwrap();
        }
        let nodes = map.node_count();
        let pool = map.pool.clone();
        let before = pool.stats().released;
        map.destroy().unwrap();
        assert_eq!(pool.stats().released - before, nodes);
    }
}
