//! # Pager
//!
//! The pager owns the file handle, the mmap read path, and the
//! transaction-scoped page staging area:
//!
//! - `flushed`: one past the highest durable page, loaded from the meta
//!   page (or 2 on a fresh file: the meta page plus the initial free-list
//!   node).
//! - `nappend`: pages appended by the current transaction; they occupy
//!   numbers `flushed .. flushed + nappend`.
//! - `updates`: whole-page images for every page the transaction
//!   allocated, rewrote, or appended. Reads consult this map first, so a
//!   transaction observes its own writes; everyone else keeps reading the
//!   durable pages through the mmap.
//!
//! Committing is split between [`Pager::write_pages`] (extend the mmap,
//! positionally write every staged page, advance `flushed`) and the
//! caller, which orders the fsyncs and the meta-page rewrite. Rolling
//! back is dropping the staged map and resetting `nappend`.
//!
//! The fsync implementation is injectable so tests can observe and fail
//! specific sync points; the default calls `File::sync_data`.

use std::fs::File;
use std::os::unix::fs::FileExt;

use eyre::{Result, WrapErr};
use hashbrown::HashMap;
use zerocopy::IntoBytes;

use super::meta::MetaPage;
use super::mmap::MmapChunks;
use crate::config::PAGE_SIZE;

/// Injectable fsync hook; see [`Pager::set_fsync`].
pub type FsyncFn = Box<dyn FnMut(&File) -> std::io::Result<()> + Send>;

pub struct Pager {
    file: File,
    fsync: FsyncFn,
    mmap: MmapChunks,
    flushed: u64,
    nappend: u64,
    updates: HashMap<u64, Box<[u8]>>,
}

impl Pager {
    pub fn new(file: File) -> Pager {
        Pager {
            file,
            fsync: Box::new(|f| f.sync_data()),
            mmap: MmapChunks::new(),
            flushed: 0,
            nappend: 0,
            updates: HashMap::new(),
        }
    }

    /// One past the highest durable page.
    pub fn flushed(&self) -> u64 {
        self.flushed
    }

    /// Pages appended by the current transaction, not yet durable.
    pub fn nappend(&self) -> u64 {
        self.nappend
    }

    /// Raw bytes of page 0, read through the mmap. Used for meta loading
    /// before the durable page count is known.
    pub fn read_meta_bytes(&self) -> &[u8] {
        self.mmap.page(0)
    }

    pub(crate) fn set_flushed(&mut self, flushed: u64) {
        self.flushed = flushed;
    }

    pub(crate) fn extend_mmap(&mut self, min_size: u64) -> Result<()> {
        self.mmap.extend(&self.file, min_size)
    }

    /// Replaces the fsync implementation. Intended for tests that need to
    /// bypass syncing or inject failures at specific sync points.
    pub fn set_fsync(&mut self, fsync: FsyncFn) {
        self.fsync = fsync;
    }

    /// Reads a page: the staged copy when the current transaction touched
    /// it, the mmap slice otherwise.
    pub fn read_page(&self, ptr: u64) -> &[u8] {
        if let Some(page) = self.updates.get(&ptr) {
            return page;
        }
        assert!(ptr < self.flushed, "read of unallocated page {ptr}");
        self.mmap.page(ptr)
    }

    /// Returns a mutable staged copy of a page, materializing it from the
    /// mmap on first touch.
    pub fn write_page(&mut self, ptr: u64) -> &mut [u8] {
        let Pager {
            updates,
            mmap,
            flushed,
            ..
        } = self;
        updates.entry(ptr).or_insert_with(|| {
            assert!(ptr < *flushed, "write of unallocated page {ptr}");
            mmap.page(ptr).into()
        })
    }

    /// Stages `data` (its first page worth) at an existing page number,
    /// replacing any earlier staged copy. Used when a freed page is
    /// reallocated within a transaction.
    pub fn stage_at(&mut self, ptr: u64, data: &[u8]) {
        assert!(data.len() >= PAGE_SIZE);
        self.updates.insert(ptr, data[..PAGE_SIZE].into());
    }

    /// Assigns the next append page number and stages `data` there.
    pub fn append_page(&mut self, data: &[u8]) -> u64 {
        assert!(data.len() >= PAGE_SIZE);
        let ptr = self.flushed + self.nappend;
        self.nappend += 1;
        self.updates.insert(ptr, data[..PAGE_SIZE].into());
        ptr
    }

    /// Appends a zeroed page (a fresh free-list node).
    pub fn append_zeroed(&mut self) -> u64 {
        let ptr = self.flushed + self.nappend;
        self.nappend += 1;
        self.updates.insert(ptr, vec![0u8; PAGE_SIZE].into_boxed_slice());
        ptr
    }

    /// Flushes the staged page set to the file and advances the durable
    /// high-water mark. The caller is responsible for fsync ordering.
    pub fn write_pages(&mut self) -> Result<()> {
        let size = (self.flushed + self.nappend) * PAGE_SIZE as u64;
        self.extend_mmap(size)?;

        for (&ptr, page) in &self.updates {
            let offset = ptr * PAGE_SIZE as u64;
            self.file
                .write_all_at(page, offset)
                .wrap_err_with(|| format!("failed to write page {ptr}"))?;
        }

        self.flushed += self.nappend;
        self.nappend = 0;
        self.updates.clear();
        Ok(())
    }

    /// Rewrites the 64-byte meta header at the start of page 0.
    pub fn write_meta(&mut self, meta: &MetaPage) -> Result<()> {
        self.file
            .write_all_at(meta.as_bytes(), 0)
            .wrap_err("failed to write meta page")
    }

    pub fn sync(&mut self) -> Result<()> {
        (self.fsync)(&self.file).wrap_err("fsync failed")
    }

    /// Drops everything the current transaction staged.
    pub fn discard(&mut self) {
        self.nappend = 0;
        self.updates.clear();
    }
}

impl std::fmt::Debug for Pager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pager")
            .field("flushed", &self.flushed)
            .field("nappend", &self.nappend)
            .field("staged", &self.updates.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_pager() -> (tempfile::TempDir, Pager) {
        let dir = tempfile::tempdir().unwrap();
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(dir.path().join("test.db"))
            .unwrap();
        (dir, Pager::new(file))
    }

    fn page_with_marker(marker: u8) -> Vec<u8> {
        let mut page = vec![0u8; PAGE_SIZE];
        page[0] = marker;
        page
    }

    #[test]
    fn append_assigns_dense_page_numbers() {
        let (_dir, mut pager) = test_pager();
        pager.set_flushed(2);

        let a = pager.append_page(&page_with_marker(0xAA));
        let b = pager.append_page(&page_with_marker(0xBB));

        assert_eq!(a, 2);
        assert_eq!(b, 3);
        assert_eq!(pager.read_page(2)[0], 0xAA);
        assert_eq!(pager.read_page(3)[0], 0xBB);
    }

    #[test]
    fn staged_pages_shadow_reads() {
        let (_dir, mut pager) = test_pager();
        pager.set_flushed(1);
        let ptr = pager.append_page(&page_with_marker(1));

        pager.stage_at(ptr, &page_with_marker(2));

        assert_eq!(pager.read_page(ptr)[0], 2);
    }

    #[test]
    fn write_pages_makes_appends_durable_and_readable_via_mmap() {
        let (_dir, mut pager) = test_pager();
        pager.set_flushed(1);
        pager.stage_at(0, &page_with_marker(0));
        let ptr = pager.append_page(&page_with_marker(0x42));

        pager.write_pages().unwrap();

        assert_eq!(pager.flushed(), 2);
        // No longer staged; the read goes through the mmap.
        assert_eq!(pager.read_page(ptr)[0], 0x42);
    }

    #[test]
    fn discard_forgets_staged_state() {
        let (_dir, mut pager) = test_pager();
        pager.set_flushed(2);
        pager.append_page(&page_with_marker(1));

        pager.discard();

        let ptr = pager.append_page(&page_with_marker(2));
        assert_eq!(ptr, 2, "page numbers restart after discard");
    }

    #[test]
    #[should_panic]
    fn reading_an_unallocated_page_panics() {
        let (_dir, pager) = test_pager();
        pager.read_page(5);
    }

    #[test]
    fn custom_fsync_hook_is_invoked() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let (_dir, mut pager) = test_pager();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        pager.set_fsync(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        pager.sync().unwrap();
        pager.sync().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
