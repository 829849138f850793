//! # BurrowDB - Embedded Copy-on-Write Key-Value Store
//!
//! BurrowDB is a single-file embedded database built around a copy-on-write
//! B+tree over fixed 4KB pages, with a persistent free list for page reuse,
//! a memory-mapped read path, and a two-fsync commit protocol. A thin
//! relational layer (typed columns, order-preserving key encoding, range
//! scans) composes on top of the key-value engine.
//!
//! ## Quick Start
//!
//! ```ignore
//! use burrowdb::{Record, TableDef, ValueType, DB};
//!
//! let mut db = DB::open("./my.db")?;
//!
//! db.table_new(TableDef {
//!     name: "users".into(),
//!     cols: vec!["id".into(), "name".into()],
//!     types: vec![ValueType::Int64, ValueType::Bytes],
//!     pkeys: 1,
//!     prefix: 0,
//! })?;
//!
//! db.upsert("users", Record::new().with_int64("id", 1).with_bytes("name", b"alice"))?;
//!
//! let row = db.get("users", &Record::new().with_int64("id", 1))?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-------------------------------------+
//! |        Relational Layer (DB)        |   tables, records, range scans
//! +-------------------------------------+
//! |   Tuple Codec (order-preserving)    |   i64 sign flip, byte escaping
//! +-------------------------------------+
//! |       Key-Value Engine (KV)         |   commit protocol, meta page
//! +-------------------------------------+
//! |  CoW B+Tree   |  Free List (FIFO)   |   node codec, splits, merges
//! +-------------------------------------+
//! |     Pager (staged page writes)      |   append + reuse allocation
//! +-------------------------------------+
//! |      Memory-Mapped File Reads       |   chunked read-only windows
//! +-------------------------------------+
//! ```
//!
//! ## Durability Model
//!
//! All mutations are staged in memory as whole-page copies. Commit writes
//! the staged pages, fsyncs, rewrites the meta page (page 0), and fsyncs
//! again. A crash between the two fsyncs leaves the previous meta page
//! intact, so readers always observe the last committed tree. Pages freed
//! by a transaction are quarantined behind a sequence barrier and only
//! become reusable after the commit that freed them has become durable.
//!
//! ## Concurrency Model
//!
//! Single-writer, synchronous. Every public operation completes before
//! returning; there is no background work and no shared mutable state.
//!
//! ## Module Overview
//!
//! - [`btree`]: node codec, CoW tree operations, bidirectional cursor
//! - [`storage`]: mmap windows, pager, free list, meta page, KV engine
//! - [`encoding`]: order-preserving tuple codec
//! - [`types`]: column values and records
//! - [`schema`]: table definitions and the system catalog
//! - [`database`]: the relational layer and the range scanner

pub mod btree;
pub mod config;
pub mod database;
pub mod encoding;
pub mod schema;
pub mod storage;
pub mod types;

pub use btree::{BTree, Cmp, Iter, PageRead, PageStore, UpdateMode, UpdateReq};
pub use database::{ScanRange, Scanner, UpdateOutcome, DB};
pub use schema::TableDef;
pub use storage::KV;
pub use types::{Record, Value, ValueType};
