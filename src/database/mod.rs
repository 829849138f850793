//! # Relational Layer
//!
//! [`DB`] composes typed tables on top of the key-value engine. Rows are
//! encoded as one KV pair: the key is the table prefix plus the
//! order-preserving encoding of the primary-key columns, the value is
//! the encoding of the remaining columns.
//!
//! ## Catalog
//!
//! Table definitions live in the `@table` system table as JSON; the next
//! available table prefix lives in `@meta` under `next_prefix`. Both are
//! ordinary rows in the same KV store, so catalog updates ride the same
//! commit protocol as user data. Definitions are cached in memory per
//! open database; the single-writer model keeps the cache trivially
//! coherent.
//!
//! ## Scans
//!
//! [`DB::scan`] resolves a [`ScanRange`] against a table and returns a
//! [`Scanner`] over the underlying tree cursor; see the `scan` module.

mod scan;

pub use scan::{ScanRange, Scanner};

use std::path::Path;
use std::sync::Arc;

use eyre::{ensure, eyre, Result, WrapErr};
use hashbrown::HashMap;
use tracing::debug;

use crate::btree::UpdateMode;
use crate::config::TABLE_PREFIX_MIN;
use crate::encoding::{decode_values, encode_key, encode_values};
use crate::schema::{check_record, internal_table, TableDef, TDEF_META, TDEF_TABLE};
use crate::storage::KV;
use crate::types::{Record, Value};

/// Outcome flags of a row write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// A new row was added.
    pub added: bool,
    /// A row was added or an existing row's value changed.
    pub updated: bool,
}

pub struct DB {
    kv: KV,
    tables: HashMap<String, Arc<TableDef>>,
}

impl DB {
    pub fn open(path: impl AsRef<Path>) -> Result<DB> {
        Ok(DB {
            kv: KV::open(path)?,
            tables: HashMap::new(),
        })
    }

    pub fn close(self) {
        self.kv.close();
    }

    /// Creates a table, allocating its prefix from the catalog. Returns
    /// the assigned prefix.
    pub fn table_new(&mut self, mut tdef: TableDef) -> Result<u32> {
        tdef.validate()?;
        ensure!(
            tdef.prefix == 0,
            "table '{}': the prefix is assigned by the catalog",
            tdef.name
        );
        ensure!(
            internal_table(&tdef.name).is_none(),
            "table name '{}' is reserved",
            tdef.name
        );

        let by_name = Record::new().with_bytes("name", tdef.name.as_bytes());
        ensure!(
            self.read_row(&TDEF_TABLE, &by_name)?.is_none(),
            "table exists: {}",
            tdef.name
        );

        // Allocate the prefix, then persist the bumped counter before the
        // definition; a crash in between leaks a prefix but never a name.
        let next_key = Record::new().with_bytes("key", b"next_prefix");
        let mut prefix = TABLE_PREFIX_MIN;
        if let Some(meta) = self.read_row(&TDEF_META, &next_key)? {
            let raw = meta.get("val").and_then(Value::as_bytes).unwrap_or(&[]);
            ensure!(raw.len() == 4, "catalog corruption: bad next_prefix value");
            prefix = u32::from_le_bytes(raw.try_into().expect("4-byte slice"));
            ensure!(
                prefix > TABLE_PREFIX_MIN,
                "catalog corruption: next_prefix {prefix} below minimum"
            );
        }
        ensure!(prefix < u32::MAX, "table prefix space exhausted");

        let bumped = next_key.with_bytes("val", &(prefix + 1).to_le_bytes());
        self.write_row(&TDEF_META, &bumped, UpdateMode::Upsert)?;

        tdef.prefix = prefix;
        let doc = serde_json::to_vec(&tdef)
            .wrap_err_with(|| format!("failed to serialize definition of '{}'", tdef.name))?;
        let row = by_name.with_bytes("def", &doc);
        self.write_row(&TDEF_TABLE, &row, UpdateMode::Upsert)?;

        debug!(table = %tdef.name, prefix, "created table");
        self.tables.insert(tdef.name.clone(), Arc::new(tdef));
        Ok(prefix)
    }

    /// Fetches one row by primary key. `key` must carry exactly the
    /// primary-key columns.
    pub fn get(&mut self, table: &str, key: &Record) -> Result<Option<Record>> {
        let tdef = self.table_def(table)?;
        self.read_row(&tdef, key)
    }

    /// Writes one full row under the given mode.
    pub fn set(&mut self, table: &str, rec: Record, mode: UpdateMode) -> Result<UpdateOutcome> {
        let tdef = self.table_def(table)?;
        self.write_row(&tdef, &rec, mode)
    }

    /// Adds a new row; false when the primary key already exists.
    pub fn insert(&mut self, table: &str, rec: Record) -> Result<bool> {
        Ok(self.set(table, rec, UpdateMode::InsertOnly)?.added)
    }

    /// Replaces an existing row; false when the primary key is absent.
    pub fn update(&mut self, table: &str, rec: Record) -> Result<bool> {
        Ok(self.set(table, rec, UpdateMode::UpdateOnly)?.updated)
    }

    /// Adds or replaces a row.
    pub fn upsert(&mut self, table: &str, rec: Record) -> Result<bool> {
        Ok(self.set(table, rec, UpdateMode::Upsert)?.updated)
    }

    /// Deletes one row by primary key; false when absent.
    pub fn delete(&mut self, table: &str, key: &Record) -> Result<bool> {
        let tdef = self.table_def(table)?;
        let pk = check_record(&tdef, key, tdef.pkeys)?;
        let encoded = encode_key(tdef.prefix, &pk);
        self.kv.del(&encoded)
    }

    /// Starts a range scan; see [`ScanRange`] for the endpoint rules.
    pub fn scan(&mut self, table: &str, range: ScanRange) -> Result<Scanner<'_>> {
        let tdef = self.table_def(table)?;
        scan::start(&self.kv, tdef, range)
    }

    fn table_def(&mut self, name: &str) -> Result<Arc<TableDef>> {
        if let Some(tdef) = internal_table(name) {
            return Ok(tdef);
        }
        if let Some(tdef) = self.tables.get(name) {
            return Ok(Arc::clone(tdef));
        }
        let by_name = Record::new().with_bytes("name", name.as_bytes());
        let row = self
            .read_row(&TDEF_TABLE, &by_name)?
            .ok_or_else(|| eyre!("table not found: {name}"))?;
        let doc = row.get("def").and_then(Value::as_bytes).unwrap_or(&[]);
        let tdef: TableDef = serde_json::from_slice(doc)
            .wrap_err_with(|| format!("failed to parse stored definition of '{name}'"))?;
        let tdef = Arc::new(tdef);
        self.tables.insert(name.to_string(), Arc::clone(&tdef));
        Ok(tdef)
    }

    fn read_row(&self, tdef: &TableDef, key: &Record) -> Result<Option<Record>> {
        let pk = check_record(tdef, key, tdef.pkeys)?;
        let encoded = encode_key(tdef.prefix, &pk);
        let Some(raw) = self.kv.get(&encoded) else {
            return Ok(None);
        };
        let rest = decode_values(raw, &tdef.types[tdef.pkeys..])?;

        let mut row = Record::new();
        for (col, val) in tdef.cols.iter().zip(pk.into_iter().chain(rest)) {
            row.push(col.clone(), val);
        }
        Ok(Some(row))
    }

    fn write_row(
        &mut self,
        tdef: &TableDef,
        rec: &Record,
        mode: UpdateMode,
    ) -> Result<UpdateOutcome> {
        let vals = check_record(tdef, rec, tdef.cols.len())?;
        let key = encode_key(tdef.prefix, &vals[..tdef.pkeys]);
        let mut val = Vec::new();
        encode_values(&mut val, &vals[tdef.pkeys..]);

        let mut req = crate::btree::UpdateReq::with_mode(&key, &val, mode);
        self.kv.update(&mut req)?;
        Ok(UpdateOutcome {
            added: req.added,
            updated: req.updated,
        })
    }
}

impl std::fmt::Debug for DB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DB")
            .field("path", &self.kv.path())
            .field("cached_tables", &self.tables.len())
            .finish()
    }
}
