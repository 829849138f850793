//! # Column Values
//!
//! The relational layer supports two column types: arbitrary byte strings
//! and signed 64-bit integers. Both have order-preserving encodings (see
//! `encoding::key`), which is what makes them usable in primary keys and
//! range scans.

use serde::{Deserialize, Serialize};

/// A column's declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Bytes,
    Int64,
}

/// A typed column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bytes(Vec<u8>),
    Int64(i64),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bytes(_) => ValueType::Bytes,
            Value::Int64(_) => ValueType::Int64,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Int64(_) => None,
        }
    }

    pub fn as_int64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            Value::Bytes(_) => None,
        }
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Value {
        Value::Bytes(b.to_vec())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::Int64(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_type_matches_variant() {
        assert_eq!(Value::Bytes(vec![1]).value_type(), ValueType::Bytes);
        assert_eq!(Value::Int64(7).value_type(), ValueType::Int64);
    }

    #[test]
    fn accessors_are_variant_specific() {
        let b = Value::Bytes(b"x".to_vec());
        let i = Value::Int64(-3);

        assert_eq!(b.as_bytes(), Some(&b"x"[..]));
        assert_eq!(b.as_int64(), None);
        assert_eq!(i.as_int64(), Some(-3));
        assert_eq!(i.as_bytes(), None);
    }
}
