//! # Table Definitions
//!
//! A [`TableDef`] names the columns, their types, how many of the leading
//! columns form the primary key, and the table's key prefix. Definitions
//! are serialized to JSON and stored in the `@table` catalog; the derive
//! keeps the stored document in sync with the struct.
//!
//! [`check_record`] is the write/read-path gatekeeper: it reorders a
//! caller-supplied record into schema column order and validates types
//! and presence, so everything past it can index columns positionally.

use eyre::{bail, ensure, Result};
use serde::{Deserialize, Serialize};

use crate::types::{Record, Value, ValueType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub types: Vec<ValueType>,
    pub cols: Vec<String>,
    /// Number of leading columns forming the primary key.
    pub pkeys: usize,
    /// Key prefix; assigned by the catalog, 0 until then.
    #[serde(default)]
    pub prefix: u32,
}

impl TableDef {
    /// Structural validation of a definition supplied by a caller.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.name.is_empty(), "table name must not be empty");
        ensure!(
            !self.cols.is_empty(),
            "table '{}' must have at least one column",
            self.name
        );
        ensure!(
            self.cols.len() == self.types.len(),
            "table '{}': {} columns but {} types",
            self.name,
            self.cols.len(),
            self.types.len()
        );
        ensure!(
            self.pkeys >= 1 && self.pkeys <= self.cols.len(),
            "table '{}': bad primary key count {}",
            self.name,
            self.pkeys
        );
        Ok(())
    }
}

/// Reorders `rec` into schema column order and validates it.
///
/// With `n == tdef.pkeys` the record must be exactly the primary key;
/// with `n == tdef.cols.len()` it must supply every column. The returned
/// values are in schema order, truncated to the first `n`.
pub fn check_record(tdef: &TableDef, rec: &Record, n: usize) -> Result<Vec<Value>> {
    assert!(rec.cols().len() == rec.vals().len());

    let mut out: Vec<Option<Value>> = vec![None; tdef.cols.len()];
    for (i, col) in tdef.cols.iter().enumerate() {
        let Some(val) = rec.get(col) else {
            continue;
        };
        ensure!(
            val.value_type() == tdef.types[i],
            "bad type for column '{col}' of table '{}'",
            tdef.name
        );
        out[i] = Some(val.clone());
    }

    for col in rec.cols() {
        ensure!(
            tdef.cols.contains(col),
            "unknown column '{col}' for table '{}'",
            tdef.name
        );
    }

    let mut vals = Vec::with_capacity(n);
    for (i, slot) in out.into_iter().enumerate() {
        match slot {
            Some(val) if i < n => vals.push(val),
            Some(_) => bail!(
                "extra column '{}' for table '{}'",
                tdef.cols[i],
                tdef.name
            ),
            None if i < n => bail!(
                "missing column '{}' for table '{}'",
                tdef.cols[i],
                tdef.name
            ),
            None => {}
        }
    }
    Ok(vals)
}
