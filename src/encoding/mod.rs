//! Order-preserving tuple encoding for B+tree keys and row values.

mod key;

pub use key::{decode_values, encode_key, encode_values, escape_bytes, unescape_bytes};
