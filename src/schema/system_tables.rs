//! # System Catalog Tables
//!
//! Two internal tables bootstrap the catalog:
//!
//! - `@meta` (prefix 1): engine metadata as key-value pairs. Currently
//!   holds `next_prefix`, the next user-table prefix as a little-endian
//!   u32.
//! - `@table` (prefix 2): one row per table, mapping the table name to
//!   its JSON-serialized [`TableDef`].
//!
//! Both are readable through the public `DB::get` like any other table;
//! user tables start at prefix 100 (`TABLE_PREFIX_MIN`), leaving room
//! for future system tables.

use std::sync::{Arc, LazyLock};

use super::table::TableDef;
use crate::types::ValueType;

pub const META_TABLE: &str = "@meta";
pub const SCHEMA_TABLE: &str = "@table";

pub static TDEF_META: LazyLock<Arc<TableDef>> = LazyLock::new(|| {
    Arc::new(TableDef {
        name: META_TABLE.into(),
        types: vec![ValueType::Bytes, ValueType::Bytes],
        cols: vec!["key".into(), "val".into()],
        pkeys: 1,
        prefix: 1,
    })
});

pub static TDEF_TABLE: LazyLock<Arc<TableDef>> = LazyLock::new(|| {
    Arc::new(TableDef {
        name: SCHEMA_TABLE.into(),
        types: vec![ValueType::Bytes, ValueType::Bytes],
        cols: vec!["name".into(), "def".into()],
        pkeys: 1,
        prefix: 2,
    })
});

/// Resolves internal table names to their fixed definitions.
pub fn internal_table(name: &str) -> Option<Arc<TableDef>> {
    match name {
        META_TABLE => Some(Arc::clone(&TDEF_META)),
        SCHEMA_TABLE => Some(Arc::clone(&TDEF_TABLE)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_tables_have_reserved_prefixes() {
        assert_eq!(TDEF_META.prefix, 1);
        assert_eq!(TDEF_TABLE.prefix, 2);
        assert!(TDEF_META.prefix < crate::config::TABLE_PREFIX_MIN);
        assert!(TDEF_TABLE.prefix < crate::config::TABLE_PREFIX_MIN);
    }

    #[test]
    fn internal_table_resolves_both_names() {
        assert!(internal_table(META_TABLE).is_some());
        assert!(internal_table(SCHEMA_TABLE).is_some());
        assert!(internal_table("users").is_none());
    }

    #[test]
    fn internal_definitions_are_structurally_valid() {
        TDEF_META.validate().unwrap();
        TDEF_TABLE.validate().unwrap();
    }
}
