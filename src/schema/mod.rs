//! Table definitions, record validation, and the system catalog.

mod system_tables;
mod table;

pub use system_tables::{internal_table, META_TABLE, SCHEMA_TABLE, TDEF_META, TDEF_TABLE};
pub use table::{check_record, TableDef};
