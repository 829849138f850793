//! # Chunked Memory-Mapped Reads
//!
//! The database file is mapped read-only as a list of non-contiguous
//! windows. Growth appends a new window covering the next span of the
//! file instead of remapping: chunk sizes start at 64 MiB and double with
//! each extension, so a file of any size is covered by a handful of
//! windows and previously returned page slices are never invalidated.
//!
//! Windows may extend past the current end of file; that is legal, and
//! the pages become readable as soon as positional writes grow the file.
//! The pager only ever reads pages below the durable high-water mark, so
//! no access lands in the unwritten tail.

use std::fs::File;

use eyre::{Result, WrapErr};
use memmap2::{Advice, Mmap, MmapOptions};

use crate::config::PAGE_SIZE;

/// Minimum size of a single mmap window.
pub const MIN_MMAP_SIZE: u64 = 64 << 20;

#[derive(Debug, Default)]
pub struct MmapChunks {
    total: u64,
    chunks: Vec<Mmap>,
}

impl MmapChunks {
    pub fn new() -> MmapChunks {
        MmapChunks::default()
    }

    /// Bytes covered by the current windows.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Grows the mapped range until it covers `min_size` bytes.
    pub fn extend(&mut self, file: &File, min_size: u64) -> Result<()> {
        while self.total < min_size {
            let alloc = self.total.max(MIN_MMAP_SIZE);
            // SAFETY: the mapping is read-only and private to this
            // process; the engine is the only writer to the file, and all
            // reads are bounds-checked against the durable page count
            // before a slice is handed out.
            let chunk = unsafe {
                MmapOptions::new()
                    .offset(self.total)
                    .len(alloc as usize)
                    .map(file)
            }
            .wrap_err_with(|| {
                format!("failed to map {alloc} bytes at file offset {}", self.total)
            })?;
            // B+tree reads are random access; tell the kernel not to
            // read ahead aggressively.
            let _ = chunk.advise(Advice::Random);
            self.chunks.push(chunk);
            self.total += alloc;
        }
        Ok(())
    }

    /// The 4KB slice for a page. Panics when the page is not covered.
    pub fn page(&self, ptr: u64) -> &[u8] {
        let offset = ptr * PAGE_SIZE as u64;
        let mut start = 0u64;
        for chunk in &self.chunks {
            let end = start + chunk.len() as u64;
            if offset < end {
                let rel = (offset - start) as usize;
                return &chunk[rel..rel + PAGE_SIZE];
            }
            start = end;
        }
        panic!("page {ptr} is beyond the mapped region ({} bytes)", self.total);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn file_with_pages(pages: &[&[u8; 4]]) -> (tempfile::TempDir, File) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let mut file = File::create(&path).unwrap();
        for marker in pages {
            let mut page = vec![0u8; PAGE_SIZE];
            page[..4].copy_from_slice(*marker);
            file.write_all(&page).unwrap();
        }
        file.sync_all().unwrap();
        drop(file);
        (dir, File::open(&path).unwrap())
    }

    #[test]
    fn extend_covers_requested_size() {
        let (_dir, file) = file_with_pages(&[b"pg00"]);
        let mut chunks = MmapChunks::new();

        chunks.extend(&file, PAGE_SIZE as u64).unwrap();

        assert!(chunks.total() >= PAGE_SIZE as u64);
    }

    #[test]
    fn extend_is_idempotent_when_covered() {
        let (_dir, file) = file_with_pages(&[b"pg00"]);
        let mut chunks = MmapChunks::new();
        chunks.extend(&file, PAGE_SIZE as u64).unwrap();
        let total = chunks.total();

        chunks.extend(&file, PAGE_SIZE as u64).unwrap();

        assert_eq!(chunks.total(), total);
    }

    #[test]
    fn page_returns_the_right_slice() {
        let (_dir, file) = file_with_pages(&[b"pg00", b"pg01", b"pg02"]);
        let mut chunks = MmapChunks::new();
        chunks.extend(&file, 3 * PAGE_SIZE as u64).unwrap();

        assert_eq!(&chunks.page(0)[..4], b"pg00");
        assert_eq!(&chunks.page(1)[..4], b"pg01");
        assert_eq!(&chunks.page(2)[..4], b"pg02");
        assert_eq!(chunks.page(1).len(), PAGE_SIZE);
    }

    #[test]
    #[should_panic]
    fn page_beyond_mapping_panics() {
        let chunks = MmapChunks::new();
        chunks.page(0);
    }
}
