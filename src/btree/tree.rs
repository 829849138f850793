//! # Copy-on-Write Tree Operations
//!
//! Mutations recurse top-down along the lookup path and rebuild nodes
//! bottom-up. Each level copies the child page into an owned buffer,
//! recurses, retires the old child, and splices the replacement (possibly
//! split into up to three page-sized nodes) back into a rebuilt parent.
//!
//! ## Splits
//!
//! Insertion builds into a two-page scratch buffer, then `node_split3`
//! cuts the result down: one node if it already fits, two after a single
//! pivot split, or three in the worst case where one oversized entry sits
//! in the middle. `node_split2` picks a pivot near the midpoint and walks
//! it until both halves fit; the right half is guaranteed to fit after
//! the first pass.
//!
//! ## Merges
//!
//! After a delete, a node smaller than a quarter page merges with a
//! sibling when the combined size fits one page. The left sibling is
//! preferred when both qualify. A child that empties out entirely while
//! being an only child propagates upward as a zero-key internal marker
//! and is eliminated before it reaches the root.
//!
//! ## The Dummy Sentinel
//!
//! The very first root is created with a leading `("", "")` entry, making
//! the leftmost leaf cover the whole key space so that `lookup_le` always
//! lands on a covering position. Public entry points reject empty keys,
//! so the sentinel is unreachable from outside.

use smallvec::{smallvec, SmallVec};

use super::iter::{Cmp, Iter};
use super::node::{
    leaf_delete, leaf_insert, leaf_update, node_merge, Node, NodeBuf, NodeType,
};
use super::{PageRead, PageStore};
use crate::config::{MAX_KEY_SIZE, MAX_VAL_SIZE, NODE_HEADER, OFFSET_SIZE, PAGE_SIZE, PTR_SIZE};

/// How an update treats an existing or missing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Insert or replace.
    #[default]
    Upsert,
    /// Only add a key that is not present.
    InsertOnly,
    /// Only replace a key that is present.
    UpdateOnly,
}

/// A single key-value mutation plus its outcome flags.
#[derive(Debug)]
pub struct UpdateReq<'a> {
    pub key: &'a [u8],
    pub val: &'a [u8],
    pub mode: UpdateMode,
    /// A new key was added.
    pub added: bool,
    /// A key was added or its value changed.
    pub updated: bool,
}

impl<'a> UpdateReq<'a> {
    pub fn new(key: &'a [u8], val: &'a [u8]) -> UpdateReq<'a> {
        UpdateReq::with_mode(key, val, UpdateMode::Upsert)
    }

    pub fn with_mode(key: &'a [u8], val: &'a [u8], mode: UpdateMode) -> UpdateReq<'a> {
        UpdateReq {
            key,
            val,
            mode,
            added: false,
            updated: false,
        }
    }
}

/// The B+tree proper: a root page number plus the algorithms around it.
#[derive(Debug, Clone, Copy, Default)]
pub struct BTree {
    root: u64,
}

impl BTree {
    pub fn new(root: u64) -> BTree {
        BTree { root }
    }

    pub fn root(&self) -> u64 {
        self.root
    }

    /// Point lookup. Returns a slice borrowed from the page store.
    pub fn get<'s, S: PageRead>(&self, store: &'s S, key: &[u8]) -> Option<&'s [u8]> {
        if self.root == 0 {
            return None;
        }
        let mut node = Node::from_page(store.page(self.root));
        loop {
            let idx = node.lookup_le(key);
            match node.node_type() {
                NodeType::Leaf => {
                    return (node.key(idx) == key).then(|| node.val(idx));
                }
                NodeType::Internal => {
                    node = Node::from_page(store.page(node.ptr(idx)));
                }
            }
        }
    }

    /// Inserts, replaces, or refuses per `req.mode`. Returns whether the
    /// tree changed; the finer-grained outcome is in `req.added` and
    /// `req.updated`.
    pub fn update<S: PageStore>(&mut self, store: &mut S, req: &mut UpdateReq) -> bool {
        assert!(!req.key.is_empty());
        assert!(req.key.len() <= MAX_KEY_SIZE);
        assert!(req.val.len() <= MAX_VAL_SIZE);

        if self.root == 0 {
            if req.mode == UpdateMode::UpdateOnly {
                return false;
            }
            // The dummy entry makes the tree cover the whole key space,
            // so lookups always find a covering node.
            let mut root = NodeBuf::new();
            root.set_header(NodeType::Leaf, 2);
            root.append_kv(0, 0, &[], &[]);
            root.append_kv(1, 0, req.key, req.val);
            self.root = store.alloc(&root);
            req.added = true;
            req.updated = true;
            return true;
        }

        let node = NodeBuf::copy_of(store.page(self.root));
        let Some(updated) = tree_insert(store, req, node) else {
            return false;
        };
        let split = node_split3(updated);
        store.free(self.root);
        if split.len() > 1 {
            // The root was split; grow the tree by one level.
            let mut root = NodeBuf::new();
            root.set_header(NodeType::Internal, split.len());
            for (i, kid) in split.iter().enumerate() {
                let ptr = store.alloc(kid);
                root.append_kv(i, ptr, kid.key(0), &[]);
            }
            self.root = store.alloc(&root);
        } else {
            self.root = store.alloc(&split[0]);
        }
        true
    }

    /// Insert-or-replace convenience form of [`BTree::update`].
    pub fn upsert<S: PageStore>(&mut self, store: &mut S, key: &[u8], val: &[u8]) -> bool {
        self.update(store, &mut UpdateReq::new(key, val))
    }

    /// Removes a key. Returns false when the key was not present.
    pub fn delete<S: PageStore>(&mut self, store: &mut S, key: &[u8]) -> bool {
        assert!(!key.is_empty());
        assert!(key.len() <= MAX_KEY_SIZE);
        if self.root == 0 {
            return false;
        }

        let node = NodeBuf::copy_of(store.page(self.root));
        let Some(updated) = tree_delete(store, node, key) else {
            return false;
        };
        store.free(self.root);
        if updated.node_type() == NodeType::Internal && updated.nkeys() == 1 {
            // The root is down to a single child; shrink by one level.
            self.root = updated.ptr(0);
        } else {
            self.root = store.alloc(&updated);
        }
        true
    }

    /// Positions a cursor at the largest key less than or equal to `key`.
    pub fn seek_le<S: PageRead>(&self, store: &S, key: &[u8]) -> Iter {
        let mut iter = Iter::new();
        let mut ptr = self.root;
        while ptr != 0 {
            let node = NodeBuf::copy_of(store.page(ptr));
            let idx = node.lookup_le(key);
            ptr = match node.node_type() {
                NodeType::Internal => node.ptr(idx),
                NodeType::Leaf => 0,
            };
            iter.push_level(node, idx);
        }
        iter
    }

    /// Positions a cursor at the key nearest to `key` under the `cmp`
    /// relation, e.g. `Cmp::Ge` yields the smallest key `>= key`.
    pub fn seek<S: PageRead>(&self, store: &S, key: &[u8], cmp: Cmp) -> Iter {
        let mut iter = self.seek_le(store, key);
        assert!(iter.is_first() || !iter.is_end());
        if cmp != Cmp::Le {
            // seek_le was off by one for the other relations.
            let cur = if iter.is_first() {
                Vec::new()
            } else {
                iter.deref().0.to_vec()
            };
            if key.is_empty() || !cmp.ok(&cur, key) {
                if cmp.forward() {
                    iter.next(store);
                } else {
                    iter.prev(store);
                }
            }
        }
        if iter.valid() {
            let (cur, _) = iter.deref();
            assert!(cmp.ok(cur, key));
        }
        iter
    }
}

/// Recursive insert step. Returns the replacement node (possibly larger
/// than one page) or `None` when the request was a no-op.
fn tree_insert<S: PageStore>(store: &mut S, req: &mut UpdateReq, node: NodeBuf) -> Option<NodeBuf> {
    let mut new_node = NodeBuf::scratch();
    let idx = node.lookup_le(req.key);

    match node.node_type() {
        NodeType::Leaf => {
            if req.key == node.key(idx) {
                if req.mode == UpdateMode::InsertOnly {
                    return None;
                }
                if req.val == node.val(idx) {
                    return None;
                }
                leaf_update(&mut new_node, &node, idx, req.key, req.val);
                req.updated = true;
            } else {
                if req.mode == UpdateMode::UpdateOnly {
                    return None;
                }
                leaf_insert(&mut new_node, &node, idx + 1, req.key, req.val);
                req.updated = true;
                req.added = true;
            }
        }
        NodeType::Internal => {
            let kptr = node.ptr(idx);
            let kid = NodeBuf::copy_of(store.page(kptr));
            let kid = tree_insert(store, req, kid)?;
            store.free(kptr);
            let split = node_split3(kid);
            node_replace_kid_n(store, &mut new_node, &node, idx, &split);
        }
    }
    Some(new_node)
}

/// Splits an oversized node into two, picking a pivot so the left half
/// fits and walking it right until the right half fits too. Each step
/// moves one key across, so the loop terminates.
fn node_split2(left: &mut Node, right: &mut Node, old: &Node) {
    assert!(old.nkeys() >= 2);

    let mut nleft = old.nkeys() / 2;

    let left_bytes =
        |nleft: usize| NODE_HEADER + (PTR_SIZE + OFFSET_SIZE) * nleft + old.offset(nleft);
    while left_bytes(nleft) > PAGE_SIZE {
        nleft -= 1;
    }
    assert!(nleft >= 1);

    let right_bytes = |nleft: usize| old.nbytes() - left_bytes(nleft) + NODE_HEADER;
    while right_bytes(nleft) > PAGE_SIZE {
        nleft += 1;
    }
    assert!(nleft < old.nkeys());
    let nright = old.nkeys() - nleft;

    left.set_header(old.node_type(), nleft);
    right.set_header(old.node_type(), nright);
    left.append_range(old, 0, 0, nleft);
    right.append_range(old, 0, nleft, nright);

    assert!(right.nbytes() <= PAGE_SIZE);
}

/// Cuts a possibly oversized node into 1-3 page-sized nodes in key order.
/// Three only happens when one large entry sits mid-node.
fn node_split3(old: NodeBuf) -> SmallVec<[NodeBuf; 3]> {
    if old.nbytes() <= PAGE_SIZE {
        return smallvec![old];
    }
    let mut left = NodeBuf::scratch();
    let mut right = NodeBuf::new();
    node_split2(&mut left, &mut right, &old);
    if left.nbytes() <= PAGE_SIZE {
        return smallvec![left, right];
    }
    let mut left_of_left = NodeBuf::new();
    let mut middle = NodeBuf::new();
    node_split2(&mut left_of_left, &mut middle, &left);
    assert!(left_of_left.nbytes() <= PAGE_SIZE);
    smallvec![left_of_left, middle, right]
}

/// Rebuilds an internal node with the child slot at `idx` replaced by the
/// given replacement kids, allocating each kid as it goes.
fn node_replace_kid_n<S: PageStore>(
    store: &mut S,
    dst: &mut Node,
    src: &Node,
    idx: usize,
    kids: &[NodeBuf],
) {
    dst.set_header(NodeType::Internal, src.nkeys() + kids.len() - 1);
    dst.append_range(src, 0, 0, idx);
    for (i, kid) in kids.iter().enumerate() {
        let ptr = store.alloc(kid);
        dst.append_kv(idx + i, ptr, kid.key(0), &[]);
    }
    dst.append_range(src, idx + kids.len(), idx + 1, src.nkeys() - (idx + 1));
}

/// Rebuilds an internal node with two adjacent child slots collapsed into
/// one (the merged child).
fn node_replace_2_kid(dst: &mut Node, src: &Node, idx: usize, ptr: u64, key: &[u8]) {
    dst.set_header(NodeType::Internal, src.nkeys() - 1);
    dst.append_range(src, 0, 0, idx);
    dst.append_kv(idx, ptr, key, &[]);
    dst.append_range(src, idx + 1, idx + 2, src.nkeys() - (idx + 2));
}

/// Recursive delete step. Returns the replacement node or `None` when the
/// key was not found.
fn tree_delete<S: PageStore>(store: &mut S, node: NodeBuf, key: &[u8]) -> Option<NodeBuf> {
    let idx = node.lookup_le(key);
    match node.node_type() {
        NodeType::Leaf => {
            if key != node.key(idx) {
                return None;
            }
            let mut new_node = NodeBuf::new();
            leaf_delete(&mut new_node, &node, idx);
            Some(new_node)
        }
        NodeType::Internal => node_delete(store, node, idx, key),
    }
}

enum MergeDir {
    None,
    Left(NodeBuf),
    Right(NodeBuf),
}

/// Internal-node half of the delete: recurse, then decide whether the
/// shrunken child should merge with a sibling.
fn node_delete<S: PageStore>(
    store: &mut S,
    node: NodeBuf,
    idx: usize,
    key: &[u8],
) -> Option<NodeBuf> {
    let kptr = node.ptr(idx);
    let kid = NodeBuf::copy_of(store.page(kptr));
    let updated = tree_delete(store, kid, key)?;
    store.free(kptr);

    let mut new_node = NodeBuf::new();
    match should_merge(store, &node, idx, &updated) {
        MergeDir::Left(sibling) => {
            let mut merged = NodeBuf::new();
            node_merge(&mut merged, &sibling, &updated);
            store.free(node.ptr(idx - 1));
            let ptr = store.alloc(&merged);
            node_replace_2_kid(&mut new_node, &node, idx - 1, ptr, merged.key(0));
        }
        MergeDir::Right(sibling) => {
            let mut merged = NodeBuf::new();
            node_merge(&mut merged, &updated, &sibling);
            store.free(node.ptr(idx + 1));
            let ptr = store.alloc(&merged);
            node_replace_2_kid(&mut new_node, &node, idx, ptr, merged.key(0));
        }
        MergeDir::None => {
            if updated.nkeys() == 0 {
                // The child emptied out and has no sibling, which only
                // happens under a single-child parent. Propagate an empty
                // internal marker; it is eliminated before the root.
                assert!(node.nkeys() == 1 && idx == 0);
                new_node.set_header(NodeType::Internal, 0);
            } else {
                node_replace_kid_n(store, &mut new_node, &node, idx, std::slice::from_ref(&updated));
            }
        }
    }
    Some(new_node)
}

/// A shrunken child merges with a sibling when it is smaller than a
/// quarter page and the combined node fits one page. Left siblings win
/// ties.
fn should_merge<S: PageStore>(store: &S, node: &Node, idx: usize, updated: &Node) -> MergeDir {
    if updated.nbytes() > PAGE_SIZE / 4 {
        return MergeDir::None;
    }
    if idx > 0 {
        let sibling = NodeBuf::copy_of(store.page(node.ptr(idx - 1)));
        if sibling.nbytes() + updated.nbytes() - NODE_HEADER <= PAGE_SIZE {
            return MergeDir::Left(sibling);
        }
    }
    if idx + 1 < node.nkeys() {
        let sibling = NodeBuf::copy_of(store.page(node.ptr(idx + 1)));
        if sibling.nbytes() + updated.nbytes() - NODE_HEADER <= PAGE_SIZE {
            return MergeDir::Right(sibling);
        }
    }
    MergeDir::None
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;

    use hashbrown::HashMap;

    use super::*;
    use crate::config::PAGE_SIZE;

    /// In-memory page store: pages live in a map, allocation is a counter.
    pub(crate) struct MemPages {
        pages: HashMap<u64, Box<[u8]>>,
        next: u64,
    }

    impl MemPages {
        pub(crate) fn new() -> MemPages {
            MemPages {
                pages: HashMap::new(),
                next: 1,
            }
        }

        pub(crate) fn len(&self) -> usize {
            self.pages.len()
        }
    }

    impl PageRead for MemPages {
        fn page(&self, ptr: u64) -> &[u8] {
            self.pages.get(&ptr).expect("dangling page pointer")
        }
    }

    impl PageStore for MemPages {
        fn alloc(&mut self, node: &Node) -> u64 {
            assert!(node.nbytes() <= PAGE_SIZE);
            let ptr = self.next;
            self.next += 1;
            self.pages
                .insert(ptr, node.as_bytes()[..PAGE_SIZE.min(node.as_bytes().len())].into());
            ptr
        }

        fn free(&mut self, ptr: u64) {
            let removed = self.pages.remove(&ptr);
            assert!(removed.is_some(), "double free of page {ptr}");
        }
    }

    pub(crate) struct TreeHarness {
        pub(crate) store: MemPages,
        pub(crate) tree: BTree,
        pub(crate) reference: BTreeMap<Vec<u8>, Vec<u8>>,
    }

    impl TreeHarness {
        pub(crate) fn new() -> TreeHarness {
            TreeHarness {
                store: MemPages::new(),
                tree: BTree::new(0),
                reference: BTreeMap::new(),
            }
        }

        pub(crate) fn add(&mut self, key: &[u8], val: &[u8]) {
            self.tree.upsert(&mut self.store, key, val);
            self.reference.insert(key.to_vec(), val.to_vec());
        }

        pub(crate) fn del(&mut self, key: &[u8]) -> bool {
            self.reference.remove(key);
            self.tree.delete(&mut self.store, key)
        }

        pub(crate) fn dump(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
            let mut out = Vec::new();
            if self.tree.root() != 0 {
                self.dump_node(self.tree.root(), &mut out);
            }
            assert_eq!(out.first().map(|(k, _)| k.len()), Some(0));
            out.remove(0);
            out
        }

        fn dump_node(&self, ptr: u64, out: &mut Vec<(Vec<u8>, Vec<u8>)>) {
            let node = Node::from_page(self.store.page(ptr));
            match node.node_type() {
                NodeType::Leaf => {
                    for i in 0..node.nkeys() {
                        out.push((node.key(i).to_vec(), node.val(i).to_vec()));
                    }
                }
                NodeType::Internal => {
                    for i in 0..node.nkeys() {
                        self.dump_node(node.ptr(i), out);
                    }
                }
            }
        }

        pub(crate) fn verify(&self) {
            let dumped = self.dump();
            let expected: Vec<(Vec<u8>, Vec<u8>)> = self
                .reference
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            assert_eq!(dumped, expected);

            if self.tree.root() != 0 {
                self.verify_node(self.tree.root());
            }
        }

        fn verify_node(&self, ptr: u64) {
            let node = Node::from_page(self.store.page(ptr));
            assert!(node.nkeys() >= 1);
            assert!(node.nbytes() <= PAGE_SIZE);
            if node.node_type() == NodeType::Leaf {
                return;
            }
            for i in 0..node.nkeys() {
                let kid = Node::from_page(self.store.page(node.ptr(i)));
                assert_eq!(node.key(i), kid.key(0), "separator mismatch");
                self.verify_node(node.ptr(i));
            }
        }
    }

    pub(crate) fn fmix32(mut h: u32) -> u32 {
        h ^= h >> 16;
        h = h.wrapping_mul(0x85eb_ca6b);
        h ^= h >> 13;
        h = h.wrapping_mul(0xc2b2_ae35);
        h ^= h >> 16;
        h
    }

    #[test]
    fn insert_and_get_single_key() {
        let mut h = TreeHarness::new();

        h.add(b"k", b"v");

        assert_eq!(h.tree.get(&h.store, b"k"), Some(&b"v"[..]));
        assert_eq!(h.tree.get(&h.store, b"missing"), None);
        h.verify();
    }

    #[test]
    fn get_on_empty_tree_returns_none() {
        let h = TreeHarness::new();

        assert_eq!(h.tree.get(&h.store, b"k"), None);
    }

    #[test]
    fn upsert_overwrites_existing_value() {
        let mut h = TreeHarness::new();

        h.add(b"k", b"v1");
        h.add(b"k", b"v2");

        assert_eq!(h.tree.get(&h.store, b"k"), Some(&b"v2"[..]));
        h.verify();
    }

    #[test]
    fn upsert_same_value_is_a_noop() {
        let mut h = TreeHarness::new();
        h.add(b"k", b"v");
        let pages_before = h.store.len();

        let changed = h.tree.upsert(&mut h.store, b"k", b"v");

        assert!(!changed);
        assert_eq!(h.store.len(), pages_before);
    }

    #[test]
    fn insert_only_refuses_existing_key() {
        let mut h = TreeHarness::new();
        h.add(b"k", b"v1");

        let mut req = UpdateReq::with_mode(b"k", b"v2", UpdateMode::InsertOnly);
        let changed = h.tree.update(&mut h.store, &mut req);

        assert!(!changed);
        assert!(!req.added && !req.updated);
        assert_eq!(h.tree.get(&h.store, b"k"), Some(&b"v1"[..]));
    }

    #[test]
    fn update_only_refuses_missing_key() {
        let mut h = TreeHarness::new();
        h.add(b"a", b"1");

        let mut req = UpdateReq::with_mode(b"b", b"2", UpdateMode::UpdateOnly);
        let changed = h.tree.update(&mut h.store, &mut req);

        assert!(!changed);
        assert_eq!(h.tree.get(&h.store, b"b"), None);
    }

    #[test]
    fn update_only_replaces_existing_key() {
        let mut h = TreeHarness::new();
        h.add(b"a", b"1");

        let mut req = UpdateReq::with_mode(b"a", b"one", UpdateMode::UpdateOnly);
        let changed = h.tree.update(&mut h.store, &mut req);

        assert!(changed);
        assert!(req.updated && !req.added);
        assert_eq!(h.tree.get(&h.store, b"a"), Some(&b"one"[..]));
    }

    #[test]
    fn delete_missing_key_returns_false() {
        let mut h = TreeHarness::new();
        h.add(b"k", b"v");

        assert!(!h.del(b"kk"));
        h.verify();
    }

    #[test]
    fn splits_grow_the_tree_and_preserve_order() {
        let mut h = TreeHarness::new();

        for i in 0..2500u32 {
            let key = format!("key{}", fmix32(i));
            let val = format!("vvv{}", fmix32(i.wrapping_neg()));
            h.add(key.as_bytes(), val.as_bytes());
            if i % 250 == 0 {
                h.verify();
            }
        }
        h.verify();
    }

    #[test]
    fn deletes_shrink_the_tree_back_to_one_page() {
        let mut h = TreeHarness::new();
        h.add(b"k", b"v");

        for i in 0..2500u32 {
            let key = format!("key{}", fmix32(i));
            h.add(key.as_bytes(), format!("vvv{i}").as_bytes());
        }
        h.verify();

        for i in 0..2500u32 {
            let key = format!("key{}", fmix32(i));
            assert!(h.del(key.as_bytes()));
        }
        h.verify();

        h.del(b"k");
        h.verify();

        // Only the dummy entry remains, on a single root page.
        assert_eq!(h.store.len(), 1);
        let root = Node::from_page(h.store.page(h.tree.root()));
        assert_eq!(root.nkeys(), 1);
    }

    #[test]
    fn ascending_and_descending_insert_orders() {
        for descending in [false, true] {
            let mut h = TreeHarness::new();
            for i in 0..2000u32 {
                let n = if descending { 2000 - i } else { i };
                let key = format!("key{n:08}");
                h.add(key.as_bytes(), b"val");
            }
            h.verify();
        }
    }

    #[test]
    fn large_entries_force_multiway_splits() {
        let mut h = TreeHarness::new();

        for i in 0..64u32 {
            let key = vec![b'k'; MAX_KEY_SIZE - 4]
                .into_iter()
                .chain(format!("{i:04}").into_bytes())
                .collect::<Vec<_>>();
            let val = vec![b'v'; MAX_VAL_SIZE];
            h.add(&key, &val);
            h.verify();
        }

        for i in (0..64u32).step_by(2) {
            let key = vec![b'k'; MAX_KEY_SIZE - 4]
                .into_iter()
                .chain(format!("{i:04}").into_bytes())
                .collect::<Vec<_>>();
            assert!(h.del(&key));
            h.verify();
        }
    }

    #[test]
    fn random_key_and_value_lengths() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(6);

        let mut h = TreeHarness::new();
        for i in 0..500u32 {
            let klen = (fmix32(2 * i) as usize % MAX_KEY_SIZE).max(1);
            let vlen = fmix32(2 * i + 1) as usize % MAX_VAL_SIZE;
            let key: Vec<u8> = (0..klen).map(|_| rng.gen()).collect();
            let val = vec![0u8; vlen];
            h.add(&key, &val);
            if i % 50 == 0 {
                h.verify();
            }
        }
        h.verify();
    }
}
