//! # Key-Value Engine
//!
//! Ties the tree, the pager, and the free list together behind a small
//! public surface: `open`, `get`, `set`, `del`, `update`, `seek`.
//!
//! ## Transaction Shape
//!
//! Every mutation is one transaction:
//!
//! 1. Snapshot the in-memory meta (tree root, high-water mark, free-list
//!    queue position).
//! 2. Run the tree mutation. All page traffic stays in the pager's staged
//!    map; a no-op returns here without touching the file.
//! 3. Commit: write staged pages, fsync, rewrite the meta page, fsync,
//!    then release this transaction's freed pages to the next one.
//!
//! Any commit error rolls the in-memory state back to the snapshot and
//! marks the engine `failed`. The on-disk meta page was either not
//! touched (data write or first fsync failed) or is in an unknown state
//! (meta write or second fsync failed); either way the next successful
//! commit starts by rewriting the meta page from memory, which repairs
//! the file before new work is made visible.
//!
//! ## Page Allocation
//!
//! Tree allocations prefer recycled pages from the free list and fall
//! back to appending; tree frees push onto the free-list tail. The free
//! list's own node pages are only ever appended, never recycled into
//! tree use within the same transaction (the `max_seq` barrier).

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use tracing::{debug, warn};

use super::freelist::FreeList;
use super::meta::MetaPage;
use super::pager::{FsyncFn, Pager};
use crate::btree::{BTree, Cmp, Iter, Node, PageRead, PageStore, UpdateReq};
use crate::config::{MAX_KEY_SIZE, MAX_VAL_SIZE, PAGE_SIZE};

pub struct KV {
    path: PathBuf,
    pager: Pager,
    tree: BTree,
    free: FreeList,
    /// The previous commit left the on-disk meta page in an unknown
    /// state; rewrite it before the next commit's data writes.
    failed: bool,
}

/// The page capabilities handed to tree mutations: reads and rewrites go
/// through the pager, allocation prefers the free list, frees feed it.
struct TreePages<'a> {
    pager: &'a mut Pager,
    free: &'a mut FreeList,
}

impl PageRead for TreePages<'_> {
    fn page(&self, ptr: u64) -> &[u8] {
        self.pager.read_page(ptr)
    }
}

impl PageStore for TreePages<'_> {
    fn alloc(&mut self, node: &Node) -> u64 {
        assert!(node.nbytes() <= PAGE_SIZE);
        let ptr = self.free.pop_head(self.pager);
        if ptr != 0 {
            self.pager.stage_at(ptr, node.as_bytes());
            ptr
        } else {
            self.pager.append_page(node.as_bytes())
        }
    }

    fn free(&mut self, ptr: u64) {
        self.free.push_tail(self.pager, ptr);
    }
}

impl PageRead for KV {
    fn page(&self, ptr: u64) -> &[u8] {
        self.pager.read_page(ptr)
    }
}

impl KV {
    /// Opens or creates the database file.
    ///
    /// A fresh file reserves page 0 for the meta page and stages page 1
    /// as the initial empty free-list node; both reach disk with the
    /// first commit. Creation fsyncs the parent directory so the file
    /// entry itself survives a crash.
    pub fn open(path: impl AsRef<Path>) -> Result<KV> {
        let path = path.as_ref();
        let existed = path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open database file '{}'", path.display()))?;

        if !existed {
            let parent = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            File::open(&parent)
                .and_then(|dir| dir.sync_all())
                .wrap_err_with(|| {
                    format!("failed to sync directory '{}'", parent.display())
                })?;
        }

        let file_size = file
            .metadata()
            .wrap_err("failed to stat database file")?
            .len();
        ensure!(
            file_size % PAGE_SIZE as u64 == 0,
            "database file '{}' size {} is not a multiple of page size {}",
            path.display(),
            file_size,
            PAGE_SIZE
        );

        let mut pager = Pager::new(file);
        let tree;
        let free;

        if file_size == 0 {
            // Reserve the meta page and the initial free-list node.
            pager.set_flushed(2);
            pager.stage_at(1, &[0u8; PAGE_SIZE]);
            tree = BTree::new(0);
            free = FreeList::new(1);
            debug!(path = %path.display(), "created database");
        } else {
            pager.extend_mmap(file_size)?;
            let (root, flushed, meta_free) = {
                let meta = MetaPage::from_bytes(pager.read_meta_bytes())?;
                meta.validate(file_size / PAGE_SIZE as u64)?;
                (
                    meta.root(),
                    meta.flushed(),
                    FreeList::load(
                        meta.head_page(),
                        meta.head_seq(),
                        meta.tail_page(),
                        meta.tail_seq(),
                    ),
                )
            };
            pager.set_flushed(flushed);
            tree = BTree::new(root);
            free = meta_free;
            debug!(path = %path.display(), root, flushed, "opened database");
        }

        Ok(KV {
            path: path.to_path_buf(),
            pager,
            tree,
            free,
            failed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the engine, unmapping the file. Uncommitted staged pages
    /// are discarded.
    pub fn close(self) {}

    /// Replaces the fsync implementation; see [`Pager::set_fsync`].
    pub fn set_fsync(&mut self, fsync: FsyncFn) {
        self.pager.set_fsync(fsync);
    }

    /// Point lookup. The empty key is reserved and never found.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        if key.is_empty() {
            return None;
        }
        self.tree.get(self, key)
    }

    /// Insert-or-replace. Returns whether the store changed.
    pub fn set(&mut self, key: &[u8], val: &[u8]) -> Result<bool> {
        let mut req = UpdateReq::new(key, val);
        self.update(&mut req)?;
        Ok(req.updated)
    }

    /// Runs one mutation under the requested mode and commits it.
    /// Outcome flags are reported through `req`.
    pub fn update(&mut self, req: &mut UpdateReq) -> Result<bool> {
        ensure!(!req.key.is_empty(), "empty keys are not allowed");
        ensure!(
            req.key.len() <= MAX_KEY_SIZE,
            "key length {} exceeds maximum {}",
            req.key.len(),
            MAX_KEY_SIZE
        );
        ensure!(
            req.val.len() <= MAX_VAL_SIZE,
            "value length {} exceeds maximum {}",
            req.val.len(),
            MAX_VAL_SIZE
        );

        let meta = self.save_meta();
        let mut store = TreePages {
            pager: &mut self.pager,
            free: &mut self.free,
        };
        if !self.tree.update(&mut store, req) {
            return Ok(false);
        }
        self.update_or_revert(&meta)?;
        Ok(req.updated)
    }

    /// Removes a key and commits. False when the key was not present.
    pub fn del(&mut self, key: &[u8]) -> Result<bool> {
        ensure!(!key.is_empty(), "empty keys are not allowed");
        ensure!(
            key.len() <= MAX_KEY_SIZE,
            "key length {} exceeds maximum {}",
            key.len(),
            MAX_KEY_SIZE
        );

        let meta = self.save_meta();
        let mut store = TreePages {
            pager: &mut self.pager,
            free: &mut self.free,
        };
        if !self.tree.delete(&mut store, key) {
            return Ok(false);
        }
        self.update_or_revert(&meta)?;
        Ok(true)
    }

    /// Positions a cursor relative to `key`; see [`BTree::seek`].
    pub fn seek(&self, key: &[u8], cmp: Cmp) -> Iter {
        self.tree.seek(self, key, cmp)
    }

    fn save_meta(&self) -> MetaPage {
        MetaPage::new(
            self.tree.root(),
            self.pager.flushed(),
            self.free.head_page(),
            self.free.head_seq(),
            self.free.tail_page(),
            self.free.tail_seq(),
        )
    }

    fn load_meta(&mut self, meta: &MetaPage) {
        self.tree = BTree::new(meta.root());
        self.pager.set_flushed(meta.flushed());
        self.free.rollback(
            meta.head_page(),
            meta.head_seq(),
            meta.tail_page(),
            meta.tail_seq(),
        );
    }

    fn update_or_revert(&mut self, meta: &MetaPage) -> Result<()> {
        if self.failed {
            // Bring the on-disk meta page back in sync with memory before
            // writing anything new near it.
            self.pager.write_meta(meta)?;
            self.pager.sync()?;
            self.failed = false;
            debug!(path = %self.path.display(), "repaired meta page after failed commit");
        }

        if let Err(err) = self.commit() {
            self.failed = true;
            self.load_meta(meta);
            self.pager.discard();
            warn!(path = %self.path.display(), error = %err, "commit failed, rolled back");
            return Err(err);
        }
        Ok(())
    }

    /// The two-fsync commit: data pages, barrier, meta page, barrier.
    fn commit(&mut self) -> Result<()> {
        self.pager.write_pages()?;
        self.pager.sync()?;
        let meta = self.save_meta();
        self.pager.write_meta(&meta)?;
        self.pager.sync()?;
        self.free.set_max_seq();
        Ok(())
    }

    /// Walks every reachable structure and checks the invariants that
    /// must hold after any committed or in-memory state: node ordering
    /// and size bounds, separator agreement, and that the tree pages,
    /// free-list node pages, free-list content, and the meta page
    /// together account for every page exactly once.
    pub fn check_integrity(&self) -> Result<()> {
        let npages = self.pager.flushed() + self.pager.nappend();
        let mut marks = vec![0u8; npages as usize];
        marks[0] = 1; // meta page

        if self.tree.root() != 0 {
            self.mark_tree(self.tree.root(), &mut marks, None)?;
        }

        // Free-list chain: node pages, then queued content pages.
        let mut ptr = self.free.head_page();
        let mut seq = self.free.head_seq();
        ensure!(ptr != 0, "free list has no head page");
        self.mark(&mut marks, ptr, 2)?;
        while seq != self.free.tail_seq() {
            let node = super::freelist::LNode::view(self.pager.read_page(ptr));
            let idx = (seq % crate::config::FREE_LIST_CAP as u64) as usize;
            self.mark(&mut marks, node.ptr(idx), 3)?;
            seq += 1;
            if idx + 1 == crate::config::FREE_LIST_CAP {
                ptr = node.next();
                self.mark(&mut marks, ptr, 2)?;
            }
        }

        for (ptr, mark) in marks.iter().enumerate() {
            ensure!(*mark != 0, "page {ptr} is leaked");
        }
        Ok(())
    }

    fn mark(&self, marks: &mut [u8], ptr: u64, kind: u8) -> Result<()> {
        ensure!(
            (ptr as usize) < marks.len(),
            "page {ptr} out of range ({} pages)",
            marks.len()
        );
        ensure!(
            marks[ptr as usize] == 0,
            "page {ptr} is referenced twice (marks {} and {kind})",
            marks[ptr as usize]
        );
        marks[ptr as usize] = kind;
        Ok(())
    }

    fn mark_tree(&self, ptr: u64, marks: &mut [u8], first_key: Option<&[u8]>) -> Result<()> {
        use crate::btree::NodeType;

        self.mark(marks, ptr, 1)?;
        let node = Node::from_page(self.pager.read_page(ptr));
        ensure!(node.nkeys() >= 1, "page {ptr}: node has no keys");
        ensure!(
            node.nbytes() <= PAGE_SIZE,
            "page {ptr}: node exceeds one page"
        );
        if let Some(expected) = first_key {
            ensure!(
                node.key(0) == expected,
                "page {ptr}: first key disagrees with parent separator"
            );
        }
        for i in 1..node.nkeys() {
            ensure!(
                node.key(i - 1) < node.key(i),
                "page {ptr}: keys out of order at {i}"
            );
        }
        if node.node_type() == NodeType::Internal {
            for i in 0..node.nkeys() {
                self.mark_tree(node.ptr(i), marks, Some(node.key(i)))?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for KV {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KV")
            .field("path", &self.path)
            .field("root", &self.tree.root())
            .field("failed", &self.failed)
            .finish()
    }
}
