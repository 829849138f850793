//! # Records
//!
//! A record is an ordered bag of named column values. Callers build them
//! with the `with_*` chain and the relational layer reorders and
//! validates them against the table schema before encoding.

use super::value::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    cols: Vec<String>,
    vals: Vec<Value>,
}

impl Record {
    pub fn new() -> Record {
        Record::default()
    }

    pub fn with_bytes(mut self, col: impl Into<String>, val: &[u8]) -> Record {
        self.cols.push(col.into());
        self.vals.push(Value::Bytes(val.to_vec()));
        self
    }

    pub fn with_int64(mut self, col: impl Into<String>, val: i64) -> Record {
        self.cols.push(col.into());
        self.vals.push(Value::Int64(val));
        self
    }

    pub fn push(&mut self, col: impl Into<String>, val: Value) {
        self.cols.push(col.into());
        self.vals.push(val);
    }

    pub fn get(&self, col: &str) -> Option<&Value> {
        self.cols
            .iter()
            .position(|c| c == col)
            .map(|i| &self.vals[i])
    }

    pub fn cols(&self) -> &[String] {
        &self.cols
    }

    pub fn vals(&self) -> &[Value] {
        &self.vals
    }

    pub fn len(&self) -> usize {
        self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_chain_preserves_order() {
        let rec = Record::new()
            .with_int64("id", 1)
            .with_bytes("name", b"alice");

        assert_eq!(rec.cols(), &["id".to_string(), "name".to_string()]);
        assert_eq!(rec.vals().len(), 2);
    }

    #[test]
    fn get_finds_columns_by_name() {
        let rec = Record::new()
            .with_int64("id", 42)
            .with_bytes("name", b"bob");

        assert_eq!(rec.get("id"), Some(&Value::Int64(42)));
        assert_eq!(rec.get("name"), Some(&Value::Bytes(b"bob".to_vec())));
        assert_eq!(rec.get("missing"), None);
    }
}
