//! # avl-tree
//!
//! An ordered map from `i64` keys to values, backed by an AVL tree whose nodes
//! also track subtree sizes. Besides the usual search/insert/delete it supports
//! splitting a tree at a key and joining two key-disjoint trees around a
//! separator, with join cost bounded by the height difference of its inputs.
//!
//! Nodes live in an arena shared by every tree split from, or joined with, the
//! same tree, so split and join only relink nodes along one root path.
//!
//! ## Example
//!
//! ```rust
//! use avl_tree::AvlTree;
//!
//! let mut tree: AvlTree = AvlTree::new();
//! for key in 1..=7 {
//!     tree.insert(key, format!("v{key}")).unwrap();
//! }
//! assert_eq!(*tree.search(4).unwrap(), "v4");
//!
//! let (mut low, high) = tree.split(4).unwrap();
//! assert_eq!(low.keys_in_order(), vec![1, 2, 3]);
//! assert_eq!(high.keys_in_order(), vec![5, 6, 7]);
//!
//! low.join(4, "four".to_string(), high);
//! assert_eq!(low.len(), 7);
//! ```

#![deny(unsafe_code)]

mod error;

pub use error::{AvlError, Result};

use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

// =============================================================================
// Configuration
// =============================================================================

// Fix-up weights reported by `insert` and `delete`.
const PROMOTE_COST: usize = 1;
const INSERT_ROTATION_COST: usize = 2; // rotation + demotion
const INSERT_DOUBLE_ROTATION_COST: usize = 5;
const DEMOTE_COST: usize = 1;
const DELETE_ROTATION_COST: usize = 3; // rotation + two rank changes
const DELETE_DOUBLE_ROTATION_COST: usize = 6;

const TRAVERSAL_STACK_CAPACITY: usize = 64;

// =============================================================================
// Node handles
// =============================================================================

/// Index of a node slot inside a [`NodeArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct NodeId(u32);

impl NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A stored entry. An absent child is `None`, with height -1 and size 0.
#[derive(Clone, Debug)]
struct Node<V> {
    key: i64,
    value: V,
    height: i32,
    /// Number of entries in the subtree rooted here, this one included.
    size: usize,
    left: Option<NodeId>,
    right: Option<NodeId>,
    parent: Option<NodeId>,
}

impl<V> Node<V> {
    fn leaf(key: i64, value: V) -> Self {
        Self {
            key,
            value,
            height: 0,
            size: 1,
            left: None,
            right: None,
            parent: None,
        }
    }
}

// =============================================================================
// Node Arena
// =============================================================================
//
// Children are owned through handles; `parent` is a plain back-reference.
// Every algorithm below takes the root of the subtree it works on explicitly,
// so any number of trees can share one arena.

/// Slot storage for nodes, with a free list of vacated slots.
struct NodeArena<V> {
    slots: Vec<Option<Node<V>>>,
    free: Vec<NodeId>,
}

impl<V> NodeArena<V> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn with_capacity(n: usize) -> Self {
        Self {
            slots: Vec::with_capacity(n),
            free: Vec::new(),
        }
    }

    /// Number of occupied slots.
    fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn capacity_bytes(&self) -> usize {
        self.slots.capacity() * std::mem::size_of::<Option<Node<V>>>()
            + self.free.capacity() * std::mem::size_of::<NodeId>()
    }

    fn shrink_to_fit(&mut self) {
        self.slots.shrink_to_fit();
        self.free.shrink_to_fit();
    }

    fn store(&mut self, node: Node<V>) -> NodeId {
        if let Some(id) = self.free.pop() {
            debug_assert!(self.slots[id.index()].is_none());
            self.slots[id.index()] = Some(node);
            return id;
        }
        let id = NodeId(self.slots.len() as u32);
        self.slots.push(Some(node));
        id
    }

    fn alloc(&mut self, key: i64, value: V) -> NodeId {
        self.store(Node::leaf(key, value))
    }

    fn release(&mut self, id: NodeId) -> Node<V> {
        let node = self.slots[id.index()]
            .take()
            .expect("released slot must be live");
        self.free.push(id);
        node
    }

    #[inline]
    fn node(&self, id: NodeId) -> &Node<V> {
        self.slots[id.index()]
            .as_ref()
            .expect("node handle must point at a live slot")
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> &mut Node<V> {
        self.slots[id.index()]
            .as_mut()
            .expect("node handle must point at a live slot")
    }

    #[inline]
    fn height(&self, id: Option<NodeId>) -> i32 {
        id.map_or(-1, |id| self.node(id).height)
    }

    #[inline]
    fn size(&self, id: Option<NodeId>) -> usize {
        id.map_or(0, |id| self.node(id).size)
    }

    #[inline]
    fn left(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).left
    }

    #[inline]
    fn right(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).right
    }

    #[inline]
    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// `(height(n) - height(left), height(n) - height(right))`.
    #[inline]
    fn rank_diff(&self, id: NodeId) -> (i32, i32) {
        let n = self.node(id);
        (n.height - self.height(n.left), n.height - self.height(n.right))
    }

    #[inline]
    fn update_height(&mut self, id: NodeId) {
        let n = self.node(id);
        let h = 1 + self.height(n.left).max(self.height(n.right));
        self.node_mut(id).height = h;
    }

    #[inline]
    fn update_size(&mut self, id: NodeId) {
        let n = self.node(id);
        let size = self.size(n.left) + self.size(n.right) + 1;
        self.node_mut(id).size = size;
    }

    #[inline]
    fn set_left(&mut self, id: NodeId, child: Option<NodeId>) {
        self.node_mut(id).left = child;
        if let Some(c) = child {
            self.node_mut(c).parent = Some(id);
        }
    }

    #[inline]
    fn set_right(&mut self, id: NodeId, child: Option<NodeId>) {
        self.node_mut(id).right = child;
        if let Some(c) = child {
            self.node_mut(c).parent = Some(id);
        }
    }

    /// Points `parent`'s link to `old` at `new` instead (`new` becomes a root
    /// when `parent` is `None`).
    fn relink(&mut self, parent: Option<NodeId>, old: NodeId, new: NodeId) {
        match parent {
            Some(p) if self.left(p) == Some(old) => self.set_left(p, Some(new)),
            Some(p) => {
                debug_assert_eq!(self.right(p), Some(old));
                self.set_right(p, Some(new));
            }
            None => self.node_mut(new).parent = None,
        }
    }

    /// Cuts `id` loose from its parent so it can root a tree of its own.
    #[inline]
    fn detach(&mut self, id: Option<NodeId>) -> Option<NodeId> {
        if let Some(id) = id {
            self.node_mut(id).parent = None;
        }
        id
    }

    /// Turns `id` back into an unlinked single-entry tree.
    fn reset_singleton(&mut self, id: NodeId) {
        let n = self.node_mut(id);
        n.left = None;
        n.right = None;
        n.parent = None;
        n.height = 0;
        n.size = 1;
    }

    fn leftmost(&self, mut id: NodeId) -> NodeId {
        while let Some(l) = self.left(id) {
            id = l;
        }
        id
    }

    fn rightmost(&self, mut id: NodeId) -> NodeId {
        while let Some(r) = self.right(id) {
            id = r;
        }
        id
    }

    fn find(&self, root: Option<NodeId>, key: i64) -> Option<NodeId> {
        let mut cur = root;
        while let Some(id) = cur {
            let n = self.node(id);
            cur = match key.cmp(&n.key) {
                std::cmp::Ordering::Less => n.left,
                std::cmp::Ordering::Greater => n.right,
                std::cmp::Ordering::Equal => return Some(id),
            };
        }
        None
    }

    // -------------------------------------------------------------------------
    // Rotations
    // -------------------------------------------------------------------------

    /// Promotes `x`'s right child into `x`'s position and returns it.
    ///
    /// Sizes of the two moved nodes are recomputed; heights are left to the caller.
    fn rotate_left(&mut self, root: &mut NodeId, x: NodeId) -> NodeId {
        let y = self.right(x).expect("rotate_left needs a right child");
        let parent = self.parent(x);
        let inner = self.left(y);

        self.set_right(x, inner);
        self.relink(parent, x, y);
        self.set_left(y, Some(x));
        if parent.is_none() {
            *root = y;
        }

        self.update_size(x);
        self.update_size(y);
        y
    }

    /// Mirror of [`Self::rotate_left`]: promotes `y`'s left child.
    fn rotate_right(&mut self, root: &mut NodeId, y: NodeId) -> NodeId {
        let x = self.left(y).expect("rotate_right needs a left child");
        let parent = self.parent(y);
        let inner = self.right(x);

        self.set_left(y, inner);
        self.relink(parent, y, x);
        self.set_right(x, Some(y));
        if parent.is_none() {
            *root = x;
        }

        self.update_size(y);
        self.update_size(x);
        x
    }

    // -------------------------------------------------------------------------
    // Insertion
    // -------------------------------------------------------------------------

    /// Hangs the unlinked single node `leaf` under `root` in key order and
    /// rebalances. Returns the fix-up count.
    fn attach_leaf(&mut self, root: &mut NodeId, leaf: NodeId) -> usize {
        let key = self.node(leaf).key;
        let mut cur = *root;
        loop {
            self.node_mut(cur).size += 1;
            let n = self.node(cur);
            debug_assert_ne!(n.key, key, "attach_leaf requires a fresh key");
            let next = if key < n.key { n.left } else { n.right };
            match next {
                Some(c) => cur = c,
                None => break,
            }
        }

        if key < self.node(cur).key {
            self.set_left(cur, Some(leaf));
        } else {
            self.set_right(cur, Some(leaf));
        }
        self.rebalance_after_insert(root, cur)
    }

    /// Walks up from `start`, whose subtree has just grown by one level on one
    /// side, restoring balance.
    fn rebalance_after_insert(&mut self, root: &mut NodeId, start: NodeId) -> usize {
        let mut ops = 0;
        let mut y = start;
        loop {
            let next = match self.rank_diff(y) {
                (0, 1) | (1, 0) => {
                    trace!(key = self.node(y).key, "insert: promote");
                    self.node_mut(y).height += 1;
                    ops += PROMOTE_COST;
                    self.parent(y)
                }
                (0, 2) => {
                    let before = self.node(y).height;
                    let x = self.left(y).expect("left-heavy node has a left child");
                    let top = match self.rank_diff(x) {
                        (2, 1) => {
                            let b = self.right(x).expect("right-heavy child has a right child");
                            trace!(key = self.node(y).key, "insert: double rotation (left-right)");
                            self.rotate_left(root, x);
                            self.rotate_right(root, y);
                            self.update_height(x);
                            self.update_height(y);
                            self.update_height(b);
                            ops += INSERT_DOUBLE_ROTATION_COST;
                            b
                        }
                        _ => {
                            trace!(key = self.node(y).key, "insert: rotate right");
                            self.rotate_right(root, y);
                            self.update_height(y);
                            self.update_height(x);
                            ops += INSERT_ROTATION_COST;
                            x
                        }
                    };
                    // A balanced heavy child only shows up after a join attaches a
                    // full-height subtree; the rotated subtree then still grew.
                    if self.node(top).height == before {
                        None
                    } else {
                        self.parent(top)
                    }
                }
                (2, 0) => {
                    let before = self.node(y).height;
                    let x = self.right(y).expect("right-heavy node has a right child");
                    let top = match self.rank_diff(x) {
                        (1, 2) => {
                            let b = self.left(x).expect("left-heavy child has a left child");
                            trace!(key = self.node(y).key, "insert: double rotation (right-left)");
                            self.rotate_right(root, x);
                            self.rotate_left(root, y);
                            self.update_height(x);
                            self.update_height(y);
                            self.update_height(b);
                            ops += INSERT_DOUBLE_ROTATION_COST;
                            b
                        }
                        _ => {
                            trace!(key = self.node(y).key, "insert: rotate left");
                            self.rotate_left(root, y);
                            self.update_height(y);
                            self.update_height(x);
                            ops += INSERT_ROTATION_COST;
                            x
                        }
                    };
                    if self.node(top).height == before {
                        None
                    } else {
                        self.parent(top)
                    }
                }
                _ => None,
            };

            match next {
                Some(p) => y = p,
                None => return ops,
            }
        }
    }

    // -------------------------------------------------------------------------
    // Deletion
    // -------------------------------------------------------------------------

    /// Removes the entry stored at `y` from the tree under `root`.
    ///
    /// A node with two children keeps its slot and takes over its successor's
    /// entry; the successor's slot is the one that gets freed.
    fn delete_node(&mut self, root: &mut Option<NodeId>, y: NodeId) -> (i64, V, usize) {
        let victim = match (self.left(y), self.right(y)) {
            (Some(_), Some(r)) => self.leftmost(r),
            _ => y,
        };
        let splice_parent = self.parent(victim);
        let child = self.left(victim).or(self.right(victim));

        match splice_parent {
            Some(p) if self.left(p) == Some(victim) => self.set_left(p, child),
            Some(p) => self.set_right(p, child),
            None => *root = self.detach(child),
        }

        let mut cur = splice_parent;
        while let Some(id) = cur {
            self.node_mut(id).size -= 1;
            cur = self.parent(id);
        }

        let removed = self.release(victim);
        let (key, value) = if victim == y {
            (removed.key, removed.value)
        } else {
            let slot = self.node_mut(y);
            (
                std::mem::replace(&mut slot.key, removed.key),
                std::mem::replace(&mut slot.value, removed.value),
            )
        };

        let ops = match (splice_parent, root.as_mut()) {
            (Some(p), Some(root)) => self.rebalance_after_delete(root, p),
            _ => 0,
        };
        (key, value, ops)
    }

    /// Walks up from `start`, one of whose subtrees has just lost a level.
    fn rebalance_after_delete(&mut self, root: &mut NodeId, start: NodeId) -> usize {
        let mut ops = 0;
        let mut z = start;
        loop {
            let next = match self.rank_diff(z) {
                (2, 2) => {
                    trace!(key = self.node(z).key, "delete: demote");
                    self.node_mut(z).height -= 1;
                    ops += DEMOTE_COST;
                    self.parent(z)
                }
                (3, 1) => {
                    let before = self.node(z).height;
                    let y = self.right(z).expect("right-heavy node has a right child");
                    let top = match self.rank_diff(y) {
                        (1, 2) => {
                            let a = self.left(y).expect("left-heavy child has a left child");
                            trace!(key = self.node(z).key, "delete: double rotation (right-left)");
                            self.rotate_right(root, y);
                            self.rotate_left(root, z);
                            self.update_height(z);
                            self.update_height(y);
                            self.update_height(a);
                            ops += DELETE_DOUBLE_ROTATION_COST;
                            a
                        }
                        _ => {
                            trace!(key = self.node(z).key, "delete: rotate left");
                            self.rotate_left(root, z);
                            self.update_height(z);
                            self.update_height(y);
                            ops += DELETE_ROTATION_COST;
                            y
                        }
                    };
                    if self.node(top).height == before {
                        None
                    } else {
                        self.parent(top)
                    }
                }
                (1, 3) => {
                    let before = self.node(z).height;
                    let y = self.left(z).expect("left-heavy node has a left child");
                    let top = match self.rank_diff(y) {
                        (2, 1) => {
                            let a = self.right(y).expect("right-heavy child has a right child");
                            trace!(key = self.node(z).key, "delete: double rotation (left-right)");
                            self.rotate_left(root, y);
                            self.rotate_right(root, z);
                            self.update_height(z);
                            self.update_height(y);
                            self.update_height(a);
                            ops += DELETE_DOUBLE_ROTATION_COST;
                            a
                        }
                        _ => {
                            trace!(key = self.node(z).key, "delete: rotate right");
                            self.rotate_right(root, z);
                            self.update_height(z);
                            self.update_height(y);
                            ops += DELETE_ROTATION_COST;
                            y
                        }
                    };
                    if self.node(top).height == before {
                        None
                    } else {
                        self.parent(top)
                    }
                }
                _ => None,
            };

            match next {
                Some(p) => z = p,
                None => return ops,
            }
        }
    }

    // -------------------------------------------------------------------------
    // Join / split
    // -------------------------------------------------------------------------

    /// Joins the trees under `low` and `high` around the unlinked single node
    /// `sep`. Keys under `low` must be below `sep`'s key, keys under `high` above.
    ///
    /// Returns the new root and `|height(low) - height(high)| + 1`.
    fn join_roots(
        &mut self,
        low: Option<NodeId>,
        sep: NodeId,
        high: Option<NodeId>,
    ) -> (NodeId, usize) {
        debug_assert_eq!(self.node(sep).size, 1);
        let (hl, hh) = (self.height(low), self.height(high));
        let cost = (hl - hh).unsigned_abs() as usize + 1;

        let root = match (low, high) {
            (None, None) => sep,
            (Some(mut root), None) | (None, Some(mut root)) => {
                self.attach_leaf(&mut root, sep);
                root
            }
            (Some(l), Some(h)) if hl == hh => {
                self.set_left(sep, Some(l));
                self.set_right(sep, Some(h));
                self.update_height(sep);
                self.update_size(sep);
                sep
            }
            (Some(mut l), Some(h)) if hl > hh => {
                self.join_along_right_spine(&mut l, sep, h);
                l
            }
            (Some(l), Some(mut h)) => {
                self.join_along_left_spine(l, sep, &mut h);
                h
            }
        };
        (root, cost)
    }

    /// `root` is the taller, lower-keyed side.
    fn join_along_right_spine(&mut self, root: &mut NodeId, sep: NodeId, high: NodeId) {
        let k = self.node(high).height;
        let mut b = Some(*root);
        let mut c = None;
        while let Some(id) = b {
            if self.node(id).height <= k {
                break;
            }
            c = Some(id);
            b = self.right(id);
        }
        let c = c.expect("taller tree has a spine node above the shorter height");

        self.set_left(sep, b);
        self.set_right(sep, Some(high));
        self.update_height(sep);
        self.update_size(sep);
        self.set_right(c, Some(sep));
        self.update_sizes_to_root(c);

        if self.node(c).height == self.node(sep).height {
            self.rebalance_after_insert(root, c);
        }
    }

    /// `root` is the taller, higher-keyed side.
    fn join_along_left_spine(&mut self, low: NodeId, sep: NodeId, root: &mut NodeId) {
        let k = self.node(low).height;
        let mut b = Some(*root);
        let mut c = None;
        while let Some(id) = b {
            if self.node(id).height <= k {
                break;
            }
            c = Some(id);
            b = self.left(id);
        }
        let c = c.expect("taller tree has a spine node above the shorter height");

        self.set_left(sep, Some(low));
        self.set_right(sep, b);
        self.update_height(sep);
        self.update_size(sep);
        self.set_left(c, Some(sep));
        self.update_sizes_to_root(c);

        if self.node(c).height == self.node(sep).height {
            self.rebalance_after_insert(root, c);
        }
    }

    fn update_sizes_to_root(&mut self, from: NodeId) {
        let mut cur = Some(from);
        while let Some(id) = cur {
            self.update_size(id);
            cur = self.parent(id);
        }
    }

    /// Splits the tree containing `pivot` into the trees of keys below and above
    /// it. `pivot` itself is left unlinked; the caller frees it.
    fn split_at(&mut self, pivot: NodeId) -> (Option<NodeId>, Option<NodeId>, SplitStats) {
        let mut stats = SplitStats::default();
        let (left, right) = (self.left(pivot), self.right(pivot));
        let mut low = self.detach(left);
        let mut high = self.detach(right);

        let mut child = pivot;
        let mut ancestor = self.parent(pivot);
        while let Some(p) = ancestor {
            ancestor = self.parent(p);
            let from_right = self.right(p) == Some(child);
            let (left, right) = (self.left(p), self.right(p));
            self.reset_singleton(p);

            let cost = if from_right {
                let left = self.detach(left);
                let (root, cost) = self.join_roots(left, p, low);
                low = Some(root);
                cost
            } else {
                let right = self.detach(right);
                let (root, cost) = self.join_roots(high, p, right);
                high = Some(root);
                cost
            };
            stats.record(cost);
            child = p;
        }

        (low, high, stats)
    }

    // -------------------------------------------------------------------------
    // Moving nodes between arenas
    // -------------------------------------------------------------------------

    /// Rebuilds the subtree under `root` in this arena, pulling each node out
    /// of its source with `take`. Returns the subtree's new root.
    fn graft(&mut self, root: NodeId, mut take: impl FnMut(NodeId) -> Node<V>) -> NodeId {
        // (source handle, new parent, hangs on the left)
        let mut stack: Vec<(NodeId, Option<NodeId>, bool)> =
            Vec::with_capacity(TRAVERSAL_STACK_CAPACITY);
        stack.push((root, None, false));

        let mut new_root = root;
        while let Some((old, parent, is_left)) = stack.pop() {
            let mut node = take(old);
            let (left, right) = (node.left.take(), node.right.take());
            node.parent = None;
            let id = self.store(node);
            match parent {
                Some(p) if is_left => self.set_left(p, Some(id)),
                Some(p) => self.set_right(p, Some(id)),
                None => new_root = id,
            }
            if let Some(r) = right {
                stack.push((r, Some(id), false));
            }
            if let Some(l) = left {
                stack.push((l, Some(id), true));
            }
        }
        new_root
    }

    /// Moves the subtree under `root` into a fresh, densely packed arena.
    fn extract(&mut self, root: NodeId) -> (NodeArena<V>, NodeId) {
        let mut out = NodeArena::with_capacity(self.node(root).size);
        let root = out.graft(root, |id| self.release(id));
        (out, root)
    }

    fn release_subtree(&mut self, root: NodeId) {
        let mut stack = Vec::with_capacity(TRAVERSAL_STACK_CAPACITY);
        stack.push(root);
        while let Some(id) = stack.pop() {
            let node = self.release(id);
            stack.extend(node.left);
            stack.extend(node.right);
        }
    }
}

// =============================================================================
// AvlTree
// =============================================================================

/// Join costs accumulated while splitting a tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SplitStats {
    /// Number of joins performed on the way up from the split key.
    pub joins: usize,
    /// Sum of the join costs.
    pub total_cost: usize,
    /// Largest single join cost.
    pub max_cost: usize,
}

impl SplitStats {
    fn record(&mut self, cost: usize) {
        self.joins += 1;
        self.total_cost += cost;
        self.max_cost = self.max_cost.max(cost);
    }
}

type SharedArena<V> = Rc<RefCell<NodeArena<V>>>;

/// An ordered map from unique `i64` keys to values, kept AVL-balanced.
///
/// Features:
/// - O(log n) search, insert and delete
/// - O(1) minimum / maximum through cached extremal nodes
/// - join of two key-disjoint trees in O(|height difference| + 1)
/// - split at a key in O(log n)
///
/// The outputs of [`split`](Self::split) keep allocating from the source
/// tree's node arena, and [`join`](Self::join) relinks trees of one arena in
/// place. Values are lent out as [`Ref`] guards; mutating a tree panics while
/// a guard from another tree in the same arena is alive.
pub struct AvlTree<V = String> {
    nodes: SharedArena<V>,
    root: Option<NodeId>,
    count: usize,
    min: Option<NodeId>,
    max: Option<NodeId>,
}

impl<V> AvlTree<V> {
    /// Creates an empty tree with a node arena of its own.
    pub fn new() -> Self {
        Self::with_arena(Rc::new(RefCell::new(NodeArena::new())), None)
    }

    /// Creates an empty tree that allocates from `other`'s node arena, so the
    /// two can later be joined without moving nodes.
    pub fn new_in(other: &AvlTree<V>) -> Self {
        Self::with_arena(Rc::clone(&other.nodes), None)
    }

    /// Whether both trees allocate from the same node arena.
    pub fn shares_arena(&self, other: &AvlTree<V>) -> bool {
        Rc::ptr_eq(&self.nodes, &other.nodes)
    }

    fn with_arena(nodes: SharedArena<V>, root: Option<NodeId>) -> Self {
        let count = nodes.borrow().size(root);
        let mut tree = Self {
            nodes,
            root,
            count,
            min: None,
            max: None,
        };
        tree.refresh_extrema();
        tree
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Height of the tree; -1 when empty, 0 for a single entry.
    #[inline]
    pub fn height(&self) -> i32 {
        self.nodes.borrow().height(self.root)
    }

    /// Key stored at the root, if any.
    pub fn root_key(&self) -> Option<i64> {
        self.root.map(|id| self.nodes.borrow().node(id).key)
    }

    /// Bytes held by the node arena. Trees sharing an arena report the same
    /// figure.
    pub fn memory_usage(&self) -> usize {
        self.nodes.borrow().capacity_bytes()
    }

    pub fn shrink_to_fit(&mut self) {
        self.nodes.borrow_mut().shrink_to_fit();
    }

    /// Moves this tree's nodes into a private arena where they occupy a dense
    /// prefix.
    ///
    /// Deletes leave vacated slots behind, and both halves of a split stay in
    /// the source arena. Returns the number of nodes moved.
    pub fn compact(&mut self) -> usize {
        let arena = match self.root {
            Some(root) => {
                let (arena, root) = self.nodes.borrow_mut().extract(root);
                self.root = Some(root);
                arena
            }
            None => NodeArena::new(),
        };
        self.nodes = Rc::new(RefCell::new(arena));
        self.refresh_extrema();
        debug!(nodes = self.count, "compacted node arena");
        self.count
    }

    fn refresh_extrema(&mut self) {
        let nodes = self.nodes.borrow();
        self.min = self.root.map(|root| nodes.leftmost(root));
        self.max = self.root.map(|root| nodes.rightmost(root));
    }

    fn debug_check_slots(&self) {
        debug_assert!(
            Rc::strong_count(&self.nodes) > 1 || self.nodes.borrow().live() == self.count,
            "a private arena holds exactly this tree's nodes"
        );
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: i64) -> Option<Ref<'_, V>> {
        let nodes = self.nodes.borrow();
        let id = nodes.find(self.root, key)?;
        Some(Ref::map(nodes, |nodes| &nodes.node(id).value))
    }

    /// Whether `key` has an entry.
    pub fn contains_key(&self, key: i64) -> bool {
        self.nodes.borrow().find(self.root, key).is_some()
    }

    /// Like [`Self::get`], reporting a missing key as an error.
    pub fn search(&self, key: i64) -> Result<Ref<'_, V>> {
        self.get(key).ok_or(AvlError::KeyNotFound(key))
    }

    /// Inserts a new entry and returns the number of rebalancing steps it took.
    ///
    /// Promotions count 1, a single rotation 2 and a double rotation 5.
    pub fn insert(&mut self, key: i64, value: V) -> Result<usize> {
        if self.contains_key(key) {
            return Err(AvlError::DuplicateKey(key));
        }

        let ops = {
            let mut nodes = self.nodes.borrow_mut();
            let leaf = nodes.alloc(key, value);
            match self.root {
                Some(mut root) => {
                    let ops = nodes.attach_leaf(&mut root, leaf);
                    self.root = Some(root);
                    ops
                }
                None => {
                    self.root = Some(leaf);
                    0
                }
            }
        };
        self.count += 1;
        self.refresh_extrema();
        self.debug_check_slots();
        Ok(ops)
    }

    /// Deletes the entry for `key` and returns the number of rebalancing steps
    /// it took.
    ///
    /// Demotions count 1, a single rotation case 3 and a double rotation case 6.
    pub fn delete(&mut self, key: i64) -> Result<usize> {
        self.delete_entry(key).map(|(_, ops)| ops)
    }

    /// Removes the entry for `key`, returning its value.
    pub fn remove(&mut self, key: i64) -> Option<V> {
        self.delete_entry(key).ok().map(|(value, _)| value)
    }

    fn delete_entry(&mut self, key: i64) -> Result<(V, usize)> {
        let (removed_key, value, ops) = {
            let mut nodes = self.nodes.borrow_mut();
            let y = nodes
                .find(self.root, key)
                .ok_or(AvlError::KeyNotFound(key))?;
            let mut root = self.root;
            let removed = nodes.delete_node(&mut root, y);
            self.root = root;
            removed
        };
        debug_assert_eq!(removed_key, key);
        self.count -= 1;
        self.refresh_extrema();
        self.debug_check_slots();
        Ok((value, ops))
    }

    /// Value of the smallest key.
    pub fn min(&self) -> Option<Ref<'_, V>> {
        let id = self.min?;
        Some(Ref::map(self.nodes.borrow(), |nodes| &nodes.node(id).value))
    }

    /// Value of the largest key.
    pub fn max(&self) -> Option<Ref<'_, V>> {
        let id = self.max?;
        Some(Ref::map(self.nodes.borrow(), |nodes| &nodes.node(id).value))
    }

    /// Smallest key.
    pub fn min_key(&self) -> Option<i64> {
        self.min.map(|id| self.nodes.borrow().node(id).key)
    }

    /// Largest key.
    pub fn max_key(&self) -> Option<i64> {
        self.max.map(|id| self.nodes.borrow().node(id).key)
    }

    /// Iterates over the entries in ascending key order.
    pub fn iter(&self) -> Iter<'_, V> {
        let nodes = self.nodes.borrow();
        let mut stack = Vec::with_capacity(TRAVERSAL_STACK_CAPACITY);
        let mut cur = self.root;
        while let Some(id) = cur {
            stack.push(id);
            cur = nodes.left(id);
        }
        Iter {
            nodes,
            stack,
            remaining: self.count,
        }
    }

    /// All keys in ascending order.
    pub fn keys_in_order(&self) -> Vec<i64> {
        self.iter().map(|(k, _)| k).collect()
    }

    /// Copies of all values in ascending key order.
    pub fn values_in_order(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.iter().map(|(_, v)| V::clone(&v)).collect()
    }

    /// Merges `other` and the separator entry `(key, value)` into this tree.
    ///
    /// All keys of one tree must be below `key` and all keys of the other above
    /// it; either tree may be the lower one. This is only checked in debug
    /// builds. Returns `|h(self) - h(other)| + 1` (an empty tree has height -1),
    /// which bounds the structural work done.
    ///
    /// Trees in the same arena are relinked in place. Otherwise the smaller
    /// tree's nodes are first moved into the larger tree's arena.
    pub fn join(&mut self, key: i64, value: V, mut other: AvlTree<V>) -> usize {
        let other_is_high = match (self.max_key(), other.min_key()) {
            (Some(max), _) => max < key,
            (None, Some(min)) => key < min,
            (None, None) => true,
        };
        debug_assert!(
            if other_is_high {
                self.max_key().map_or(true, |k| k < key)
                    && other.min_key().map_or(true, |k| key < k)
            } else {
                other.max_key().map_or(true, |k| k < key)
                    && self.min_key().map_or(true, |k| key < k)
            },
            "join requires the two trees to be separated by key {key}"
        );

        let own_height = self.height();
        let other_height = other.height();
        let other_root = self.adopt(&mut other);

        let (root, cost) = {
            let mut nodes = self.nodes.borrow_mut();
            let sep = nodes.alloc(key, value);
            let (low, high) = if other_is_high {
                (self.root, other_root)
            } else {
                (other_root, self.root)
            };
            nodes.join_roots(low, sep, high)
        };
        self.root = Some(root);
        self.count = self.nodes.borrow().size(self.root);
        self.refresh_extrema();
        self.debug_check_slots();
        debug!(key, own_height, other_height, cost, "joined trees");
        cost
    }

    /// Takes `other`'s entries over and returns their root in this tree's
    /// arena, leaving `other` empty.
    fn adopt(&mut self, other: &mut AvlTree<V>) -> Option<NodeId> {
        let their_count = std::mem::take(&mut other.count);
        other.min = None;
        other.max = None;
        let theirs = other.root.take()?;
        if Rc::ptr_eq(&self.nodes, &other.nodes) {
            return Some(theirs);
        }

        if self.count >= their_count {
            let mut from = other.nodes.borrow_mut();
            let moved = self.nodes.borrow_mut().graft(theirs, |id| from.release(id));
            trace!(nodes = their_count, "moved joined tree into this arena");
            return Some(moved);
        }

        if let Some(ours) = self.root {
            let mut from = self.nodes.borrow_mut();
            let moved = other.nodes.borrow_mut().graft(ours, |id| from.release(id));
            drop(from);
            self.root = Some(moved);
            trace!(nodes = self.count, "moved this tree into the joined tree's arena");
        }
        self.nodes = Rc::clone(&other.nodes);
        Some(theirs)
    }

    /// Splits the tree at `key` into the entries below and above it.
    ///
    /// On success this tree is left empty and the entry for `key` is dropped.
    /// On failure nothing changes.
    ///
    /// Both halves stay in this tree's arena and reuse each other's vacated
    /// slots; call [`compact`](Self::compact) to give one a dense arena of its
    /// own.
    pub fn split(&mut self, key: i64) -> Result<(AvlTree<V>, AvlTree<V>)> {
        self.split_with_stats(key).map(|(low, high, _)| (low, high))
    }

    /// Like [`Self::split`], also reporting the cost of the joins performed.
    pub fn split_with_stats(&mut self, key: i64) -> Result<(AvlTree<V>, AvlTree<V>, SplitStats)> {
        let (low, high, stats) = {
            let mut nodes = self.nodes.borrow_mut();
            let pivot = nodes
                .find(self.root, key)
                .ok_or(AvlError::KeyNotFound(key))?;
            let (low, high, stats) = nodes.split_at(pivot);
            nodes.release(pivot);
            (low, high, stats)
        };
        self.root = None;
        self.count = 0;
        self.min = None;
        self.max = None;

        let low = Self::with_arena(Rc::clone(&self.nodes), low);
        let high = Self::with_arena(Rc::clone(&self.nodes), high);
        debug!(
            key,
            joins = stats.joins,
            total_cost = stats.total_cost,
            max_cost = stats.max_cost,
            low = low.len(),
            high = high.len(),
            "split tree"
        );
        Ok((low, high, stats))
    }
}

impl<V> Default for AvlTree<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Drop for AvlTree<V> {
    fn drop(&mut self) {
        // A private arena goes away with the tree.
        if Rc::strong_count(&self.nodes) == 1 {
            return;
        }
        if let (Some(root), Ok(mut nodes)) = (self.root, self.nodes.try_borrow_mut()) {
            nodes.release_subtree(root);
        }
    }
}

impl<V: Clone> Clone for AvlTree<V> {
    /// Deep copy into a fresh, densely packed arena.
    fn clone(&self) -> Self {
        let nodes = self.nodes.borrow();
        let mut arena = NodeArena::with_capacity(self.count);
        let root = self
            .root
            .map(|root| arena.graft(root, |id| nodes.node(id).clone()));
        drop(nodes);
        Self::with_arena(Rc::new(RefCell::new(arena)), root)
    }
}

impl<V: fmt::Debug> fmt::Debug for AvlTree<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, V> IntoIterator for &'a AvlTree<V> {
    type Item = (i64, Ref<'a, V>);
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// In-order iterator over the entries of an [`AvlTree`].
///
/// Holds a shared borrow of the node arena until dropped.
pub struct Iter<'a, V> {
    nodes: Ref<'a, NodeArena<V>>,
    /// Nodes whose left subtree has been visited but which are not yet yielded.
    stack: Vec<NodeId>,
    remaining: usize,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (i64, Ref<'a, V>);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let (key, mut cur) = {
            let node = self.nodes.node(id);
            (node.key, node.right)
        };
        while let Some(c) = cur {
            self.stack.push(c);
            cur = self.nodes.left(c);
        }
        self.remaining -= 1;
        let value = Ref::map(Ref::clone(&self.nodes), |nodes| &nodes.node(id).value);
        Some((key, value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V> ExactSizeIterator for Iter<'_, V> {}


#[cfg(test)]
mod proptests;
