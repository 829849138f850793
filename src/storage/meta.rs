//! # Meta Page
//!
//! Page 0 holds the durable roots of the engine in its first 64 bytes:
//!
//! ```text
//! | sig:16 | root:u64 | flushed:u64 | head_page:u64 | head_seq:u64 | tail_page:u64 | tail_seq:u64 |
//! ```
//!
//! `root` is the tree root page, `flushed` is one past the highest
//! durable page, and the remaining four fields are the free-list queue
//! state. Rewriting these 64 bytes is the atomic pointer flip at the
//! heart of the commit protocol: the write fits well inside a sector, so
//! a crash leaves either the old or the new meta page, never a mix.
//!
//! The same struct doubles as the in-memory pre-transaction snapshot that
//! a failed commit rolls back to.

use eyre::{ensure, Result};
use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::META_SIG;

/// Bytes of page 0 occupied by the meta header.
pub const META_PAGE_SIZE: usize = 64;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct MetaPage {
    sig: [u8; 16],
    root: U64,
    flushed: U64,
    head_page: U64,
    head_seq: U64,
    tail_page: U64,
    tail_seq: U64,
}

const _: () = assert!(std::mem::size_of::<MetaPage>() == META_PAGE_SIZE);

impl MetaPage {
    pub fn new(
        root: u64,
        flushed: u64,
        head_page: u64,
        head_seq: u64,
        tail_page: u64,
        tail_seq: u64,
    ) -> MetaPage {
        MetaPage {
            sig: *META_SIG,
            root: U64::new(root),
            flushed: U64::new(flushed),
            head_page: U64::new(head_page),
            head_seq: U64::new(head_seq),
            tail_page: U64::new(tail_page),
            tail_seq: U64::new(tail_seq),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&MetaPage> {
        ensure!(
            bytes.len() >= META_PAGE_SIZE,
            "buffer too small for meta page: {} < {}",
            bytes.len(),
            META_PAGE_SIZE
        );

        let meta = Self::ref_from_bytes(&bytes[..META_PAGE_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse meta page: {:?}", e))?;

        ensure!(
            &meta.sig == META_SIG,
            "bad signature: this is not a burrowdb file"
        );

        Ok(meta)
    }

    /// Range-checks the loaded pointers against the file size in pages.
    pub fn validate(&self, file_pages: u64) -> Result<()> {
        let flushed = self.flushed();
        ensure!(flushed >= 2, "meta page: flushed count {flushed} below minimum");
        ensure!(
            flushed <= file_pages,
            "meta page: flushed count {flushed} exceeds file size ({file_pages} pages)"
        );
        for (name, ptr) in [
            ("root", self.root()),
            ("free-list head", self.head_page()),
            ("free-list tail", self.tail_page()),
        ] {
            ensure!(
                ptr > 0 && ptr < flushed,
                "meta page: {name} pointer {ptr} out of range (flushed={flushed})"
            );
        }
        Ok(())
    }

    pub fn root(&self) -> u64 {
        self.root.get()
    }

    pub fn flushed(&self) -> u64 {
        self.flushed.get()
    }

    pub fn head_page(&self) -> u64 {
        self.head_page.get()
    }

    pub fn head_seq(&self) -> u64 {
        self.head_seq.get()
    }

    pub fn tail_page(&self) -> u64 {
        self.tail_page.get()
    }

    pub fn tail_seq(&self) -> u64 {
        self.tail_seq.get()
    }
}
