//! # Range Scans
//!
//! A scan is defined by two endpoints: `(cmp1, key1)` picks the starting
//! row and the direction, `(cmp2, key2)` bounds the walk. `Gt`/`Ge`
//! starting relations scan forward and pair with `Lt`/`Le` bounds; the
//! swapped pairing scans backward. Any other combination is rejected.
//!
//! The scanner holds the underlying tree cursor and the encoded end key;
//! each step checks the bound against the current encoded key, which is
//! sound because the tuple encoding is order-preserving.

use std::sync::Arc;

use eyre::{ensure, Result};

use crate::btree::{Cmp, Iter};
use crate::encoding::{decode_values, encode_key};
use crate::schema::{check_record, TableDef};
use crate::storage::KV;
use crate::types::Record;

/// Scan endpoints over a table's primary key.
#[derive(Debug, Clone)]
pub struct ScanRange {
    pub cmp1: Cmp,
    pub key1: Record,
    pub cmp2: Cmp,
    pub key2: Record,
}

pub struct Scanner<'a> {
    kv: &'a KV,
    tdef: Arc<TableDef>,
    cmp1: Cmp,
    cmp2: Cmp,
    key_end: Vec<u8>,
    iter: Iter,
}

pub(super) fn start(kv: &KV, tdef: Arc<TableDef>, range: ScanRange) -> Result<Scanner<'_>> {
    ensure!(
        range.cmp1.forward() != range.cmp2.forward(),
        "bad scan range: cmp1 and cmp2 must point in opposite directions"
    );

    let vals1 = check_record(&tdef, &range.key1, tdef.pkeys)?;
    let vals2 = check_record(&tdef, &range.key2, tdef.pkeys)?;
    let key_start = encode_key(tdef.prefix, &vals1);
    let key_end = encode_key(tdef.prefix, &vals2);

    let iter = kv.seek(&key_start, range.cmp1);
    Ok(Scanner {
        kv,
        tdef,
        cmp1: range.cmp1,
        cmp2: range.cmp2,
        key_end,
        iter,
    })
}

impl Scanner<'_> {
    /// True while the cursor is on a row inside the range.
    pub fn valid(&self) -> bool {
        if !self.iter.valid() {
            return false;
        }
        let (key, _) = self.iter.deref();
        self.cmp2.ok(key, &self.key_end)
    }

    /// Advances along the scan direction. Panics when not valid.
    pub fn step(&mut self) {
        assert!(self.valid());
        if self.cmp1.forward() {
            self.iter.next(self.kv);
        } else {
            self.iter.prev(self.kv);
        }
    }

    /// Decodes the current row. Panics when not valid.
    pub fn row(&self) -> Result<Record> {
        assert!(self.valid());
        let (key, val) = self.iter.deref();

        let pk = decode_values(&key[4..], &self.tdef.types[..self.tdef.pkeys])?;
        let rest = decode_values(val, &self.tdef.types[self.tdef.pkeys..])?;

        let mut row = Record::new();
        for (col, v) in self.tdef.cols.iter().zip(pk.into_iter().chain(rest)) {
            row.push(col.clone(), v);
        }
        Ok(row)
    }
}

impl std::fmt::Debug for Scanner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("table", &self.tdef.name)
            .field("cmp1", &self.cmp1)
            .field("cmp2", &self.cmp2)
            .finish()
    }
}
