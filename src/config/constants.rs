//! # BurrowDB Configuration Constants
//!
//! This module centralizes the on-disk geometry constants. The values are
//! interdependent; the relationships are documented here and enforced by
//! compile-time assertions where possible.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (4096 bytes)
//!       |
//!       +-> NODE_HEADER (4 bytes: type + key count)
//!       |
//!       +-> MAX_KEY_SIZE / MAX_VAL_SIZE
//!       |     One maximal entry (header + pointer + offset + lengths +
//!       |     key + value) must fit a single page. Enforced below.
//!       |
//!       +-> FREE_LIST_CAP (derived: (PAGE_SIZE - FREE_LIST_HEADER) / 8)
//!             Pointers per free-list node page.
//!
//! META_SIG (16 bytes)
//!       |
//!       +-> The meta page (page 0) starts with this signature; a mismatch
//!           on open means the file is not a BurrowDB database.
//! ```
//!
//! ## Critical Invariants
//!
//! 1. A node holding one maximal key-value entry fits in one page.
//! 2. `FREE_LIST_CAP` pointers plus the next-page link fill a page exactly
//!    (modulo trailing padding).
//!
//! Changing `PAGE_SIZE` or the size limits is a breaking format change.

/// Size of every on-disk page, in bytes. Page 0 is the meta page.
pub const PAGE_SIZE: usize = 4096;

/// Node header: 2-byte node type followed by a 2-byte key count.
pub const NODE_HEADER: usize = 4;

/// Per-key child pointer width inside a node.
pub const PTR_SIZE: usize = 8;

/// Per-key entry offset width inside a node.
pub const OFFSET_SIZE: usize = 2;

/// Key length prefix width inside a key-value entry.
pub const KLEN_SIZE: usize = 2;

/// Value length prefix width inside a key-value entry.
pub const VLEN_SIZE: usize = 2;

/// Maximum key length accepted by the engine.
pub const MAX_KEY_SIZE: usize = 1000;

/// Maximum value length accepted by the engine.
pub const MAX_VAL_SIZE: usize = 3000;

/// Free-list node header: the 8-byte next-page link.
pub const FREE_LIST_HEADER: usize = 8;

/// Page pointers held by one free-list node page.
pub const FREE_LIST_CAP: usize = (PAGE_SIZE - FREE_LIST_HEADER) / 8;

/// Signature at the start of the meta page.
pub const META_SIG: &[u8; 16] = b"BuildYourOwnDB06";

/// Lowest table prefix available to user tables; smaller prefixes are
/// reserved for the system catalog.
pub const TABLE_PREFIX_MIN: u32 = 100;

const _: () = assert!(
    NODE_HEADER + PTR_SIZE + OFFSET_SIZE + KLEN_SIZE + VLEN_SIZE + MAX_KEY_SIZE + MAX_VAL_SIZE
        <= PAGE_SIZE,
    "a single maximal key-value entry must fit in one page"
);

const _: () = assert!(FREE_LIST_CAP == 511);
