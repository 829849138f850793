//! # Bidirectional Cursor
//!
//! The cursor records the root-to-leaf path taken by a seek as two
//! parallel stacks: the nodes visited and the position chosen within
//! each. Stepping advances the position at the leaf level; on node
//! overflow it ascends until an ancestor can step sideways, then descends
//! along the leftmost (or rightmost) edge into the neighboring subtree.
//!
//! Two resting states are representable without panicking: past the last
//! entry (leaf position == key count) and at the tree's leading dummy
//! entry (every position zero). [`Iter::valid`] is false in both.
//!
//! The path holds owned copies of the visited nodes, so a cursor does not
//! borrow the page store; only [`Iter::next`] and [`Iter::prev`] touch it
//! again, to load sibling subtrees.

use smallvec::SmallVec;

use super::node::NodeBuf;
use super::PageRead;

/// Seek relation: position at the nearest key satisfying `key cmp target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Lt,
    Le,
    Ge,
    Gt,
}

impl Cmp {
    /// True for the relations that scan toward larger keys.
    pub fn forward(self) -> bool {
        matches!(self, Cmp::Ge | Cmp::Gt)
    }

    /// Evaluates `key cmp reference`.
    pub fn ok(self, key: &[u8], reference: &[u8]) -> bool {
        match self {
            Cmp::Ge => key >= reference,
            Cmp::Gt => key > reference,
            Cmp::Lt => key < reference,
            Cmp::Le => key <= reference,
        }
    }
}

/// Cursor over the tree's entries in key order.
#[derive(Debug, Default)]
pub struct Iter {
    path: SmallVec<[NodeBuf; 8]>,
    pos: SmallVec<[usize; 8]>,
}

impl Iter {
    pub(crate) fn new() -> Iter {
        Iter::default()
    }

    pub(crate) fn push_level(&mut self, node: NodeBuf, idx: usize) {
        self.path.push(node);
        self.pos.push(idx);
    }

    /// At the leading dummy entry (or on an empty tree).
    pub(crate) fn is_first(&self) -> bool {
        self.pos.iter().all(|&p| p == 0)
    }

    /// Past the last entry.
    pub(crate) fn is_end(&self) -> bool {
        match self.path.last() {
            None => true,
            Some(leaf) => self.pos[self.pos.len() - 1] >= leaf.nkeys(),
        }
    }

    /// False at either resting state (dummy entry or past the end).
    pub fn valid(&self) -> bool {
        !(self.is_first() || self.is_end())
    }

    /// The key-value pair under the cursor. Panics when not valid.
    pub fn deref(&self) -> (&[u8], &[u8]) {
        assert!(self.valid());
        let last = self.path.len() - 1;
        let node = &self.path[last];
        let pos = self.pos[last];
        (node.key(pos), node.val(pos))
    }

    /// Steps toward larger keys; stops at the past-the-end state.
    pub fn next<S: PageRead>(&mut self, store: &S) {
        if !self.is_end() {
            self.step_next(store, self.path.len() - 1);
        }
    }

    /// Steps toward smaller keys; stops at the dummy entry.
    pub fn prev<S: PageRead>(&mut self, store: &S) {
        if !self.is_first() {
            self.step_prev(store, self.path.len() - 1);
        }
    }

    fn step_next<S: PageRead>(&mut self, store: &S, level: usize) {
        if self.pos[level] + 1 < self.path[level].nkeys() {
            self.pos[level] += 1;
        } else if level > 0 {
            self.step_next(store, level - 1);
        } else {
            // Past the last key: park the leaf position one past the end.
            let leaf = self.pos.len() - 1;
            self.pos[leaf] += 1;
            assert!(self.pos[leaf] == self.path[leaf].nkeys());
            return;
        }
        if level + 1 < self.pos.len() {
            let kid = NodeBuf::copy_of(store.page(self.path[level].ptr(self.pos[level])));
            self.pos[level + 1] = 0;
            self.path[level + 1] = kid;
        }
    }

    fn step_prev<S: PageRead>(&mut self, store: &S, level: usize) {
        if self.pos[level] > 0 {
            self.pos[level] -= 1;
        } else if level > 0 {
            self.step_prev(store, level - 1);
        } else {
            panic!("prev before the first entry");
        }
        if level + 1 < self.pos.len() {
            let kid = NodeBuf::copy_of(store.page(self.path[level].ptr(self.pos[level])));
            self.pos[level + 1] = kid.nkeys() - 1;
            self.path[level + 1] = kid;
        }
    }
}
