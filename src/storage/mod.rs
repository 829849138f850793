//! # Storage Module
//!
//! Everything that touches the database file lives here.
//!
//! ## Read Path
//!
//! Reads are served from read-only mmap windows ([`MmapChunks`]). The file
//! is covered by a list of non-contiguous chunks that grow by doubling;
//! existing chunks are never remapped, so slices handed out earlier stay
//! valid for the life of the engine. Durable pages are read zero-copy.
//!
//! ## Write Path
//!
//! Writes never touch the mmap. The [`Pager`] stages every allocated,
//! rewritten, or freed-list page as a whole-page copy in memory; commit
//! flushes the staged set with positional writes and a two-fsync protocol
//! driven by [`KV`]:
//!
//! ```text
//! 1. write staged pages          (data may land anywhere beyond flushed)
//! 2. fsync                       (order data before the pointer flip)
//! 3. rewrite meta page (page 0)  (atomically flips the tree root)
//! 4. fsync                       (make the flip durable)
//! ```
//!
//! A failure anywhere leaves the on-disk meta page pointing at the old
//! tree; the engine restores its in-memory state from the pre-transaction
//! snapshot and marks itself `failed` so the next commit rewrites the
//! meta page before doing new work.
//!
//! ## Page Reuse
//!
//! Retired pages enter the persistent [`FreeList`], a FIFO of page
//! numbers sequenced across node pages. The `max_seq` barrier taken at
//! each commit keeps a transaction from consuming pages it freed itself,
//! which the durable tree still references.

mod freelist;
mod kv;
mod meta;
mod mmap;
mod pager;

pub use freelist::{FreeList, LNode};
pub use kv::KV;
pub use meta::{MetaPage, META_PAGE_SIZE};
pub use mmap::MmapChunks;
pub use pager::{FsyncFn, Pager};
