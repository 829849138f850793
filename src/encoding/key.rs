//! # Order-Preserving Tuple Codec
//!
//! Encoded tuples compare correctly under plain `memcmp`, which is the
//! property that lets the B+tree serve typed range scans without knowing
//! anything about column types.
//!
//! ## Integer Encoding
//!
//! `i64` is written as 8 big-endian bytes with the sign bit flipped:
//!
//! ```text
//! u = (v as u64) XOR (1 << 63)
//! ```
//!
//! Flipping the sign bit moves negative values below positive ones in
//! unsigned byte order, so numeric order equals lexicographic order.
//!
//! ## Byte-String Encoding
//!
//! Byte strings are null-terminated so that adjacent columns have
//! unambiguous boundaries. Embedded `0x00` and `0x01` bytes are escaped
//! through `0x01`:
//!
//! ```text
//! 0x00 -> 0x01 0x01
//! 0x01 -> 0x01 0x02
//! terminator: 0x00
//! ```
//!
//! The escape byte maps the escaped range onto strictly larger byte
//! pairs, so lexicographic order is preserved and the terminator can
//! never appear inside an encoded string.
//!
//! ## Composite Keys
//!
//! A table key is the 4-byte big-endian table prefix followed by the
//! concatenated encodings of the primary-key columns.

use eyre::{ensure, Result};

use crate::types::{Value, ValueType};

/// Escapes `0x00`/`0x01` bytes so the encoding can be null-terminated.
pub fn escape_bytes(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    escape_into(&mut out, input);
    out
}

fn escape_into(out: &mut Vec<u8>, input: &[u8]) {
    for &byte in input {
        if byte <= 1 {
            out.push(0x01);
            out.push(byte + 1);
        } else {
            out.push(byte);
        }
    }
}

/// Reverses [`escape_bytes`]. Fails on malformed escape sequences.
pub fn unescape_bytes(input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len());
    let mut iter = input.iter();
    while let Some(&byte) = iter.next() {
        if byte == 0x01 {
            let &escaped = iter
                .next()
                .ok_or_else(|| eyre::eyre!("truncated escape sequence"))?;
            ensure!(
                escaped == 1 || escaped == 2,
                "bad escape byte 0x{escaped:02x}"
            );
            out.push(escaped - 1);
        } else {
            ensure!(byte != 0, "unescaped null byte inside encoded string");
            out.push(byte);
        }
    }
    Ok(out)
}

/// Appends the order-preserving encoding of each value.
pub fn encode_values(out: &mut Vec<u8>, vals: &[Value]) {
    for val in vals {
        match val {
            Value::Int64(i) => {
                let u = (*i as u64) ^ (1 << 63);
                out.extend_from_slice(&u.to_be_bytes());
            }
            Value::Bytes(b) => {
                escape_into(out, b);
                out.push(0);
            }
        }
    }
}

/// Decodes a value tuple of the given types, requiring the input to be
/// fully consumed.
pub fn decode_values(mut input: &[u8], types: &[ValueType]) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(types.len());
    for ty in types {
        match ty {
            ValueType::Int64 => {
                ensure!(input.len() >= 8, "truncated integer column");
                let u = u64::from_be_bytes(input[..8].try_into().expect("8-byte slice"));
                out.push(Value::Int64((u ^ (1 << 63)) as i64));
                input = &input[8..];
            }
            ValueType::Bytes => {
                let end = input
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or_else(|| eyre::eyre!("unterminated string column"))?;
                out.push(Value::Bytes(unescape_bytes(&input[..end])?));
                input = &input[end + 1..];
            }
        }
    }
    ensure!(input.is_empty(), "trailing bytes after decoded tuple");
    Ok(out)
}

/// Encodes a full table key: 4-byte big-endian prefix, then the
/// primary-key columns.
pub fn encode_key(prefix: u32, vals: &[Value]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 16 * vals.len());
    out.extend_from_slice(&prefix.to_be_bytes());
    encode_values(&mut out, vals);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_vectors() {
        let cases: &[(&[u8], &[u8])] = &[
            (b"", b""),
            (&[0x00], &[0x01, 0x01]),
            (&[0x01], &[0x01, 0x02]),
            (b"plain", b"plain"),
            (&[0x00, 0x01, 0x02], &[0x01, 0x01, 0x01, 0x02, 0x02]),
        ];
        for (input, expected) in cases {
            let escaped = escape_bytes(input);
            assert_eq!(&escaped, expected);
            assert_eq!(unescape_bytes(&escaped).unwrap(), *input);
        }
    }

    #[test]
    fn unescape_rejects_malformed_input() {
        assert!(unescape_bytes(&[0x01]).is_err());
        assert!(unescape_bytes(&[0x01, 0x03]).is_err());
        assert!(unescape_bytes(&[0x00]).is_err());
    }

    #[test]
    fn int64_encoding_is_order_preserving() {
        let mut inputs = [-1i64, 0, 1, i64::MIN, i64::MAX];
        inputs.sort_unstable();

        let mut encoded = Vec::new();
        for &i in &inputs {
            let mut buf = Vec::new();
            encode_values(&mut buf, &[Value::Int64(i)]);
            let decoded = decode_values(&buf, &[ValueType::Int64]).unwrap();
            assert_eq!(decoded, vec![Value::Int64(i)]);
            encoded.push(buf);
        }

        assert!(encoded.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn bytes_encoding_is_order_preserving() {
        let inputs: &[&[u8]] = &[
            b"",
            &[0x00],
            &[0x00, 0x00],
            &[0x00, 0x01],
            &[0x01],
            b"a",
            b"a\x00",
            b"aa",
            b"b",
        ];

        let encoded: Vec<Vec<u8>> = inputs
            .iter()
            .map(|i| {
                let mut buf = Vec::new();
                encode_values(&mut buf, &[Value::Bytes(i.to_vec())]);
                buf
            })
            .collect();

        assert!(encoded.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn mixed_tuple_roundtrip() {
        let vals = vec![
            Value::Int64(-42),
            Value::Bytes(b"he\x00llo".to_vec()),
            Value::Bytes(vec![]),
            Value::Int64(i64::MAX),
        ];
        let types = [
            ValueType::Int64,
            ValueType::Bytes,
            ValueType::Bytes,
            ValueType::Int64,
        ];

        let mut buf = Vec::new();
        encode_values(&mut buf, &vals);
        let decoded = decode_values(&buf, &types).unwrap();

        assert_eq!(decoded, vals);
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut buf = Vec::new();
        encode_values(&mut buf, &[Value::Int64(1)]);
        buf.push(0xFF);

        assert!(decode_values(&buf, &[ValueType::Int64]).is_err());
    }

    #[test]
    fn decode_rejects_truncated_input() {
        assert!(decode_values(&[0x80, 0x00], &[ValueType::Int64]).is_err());
        assert!(decode_values(&[b'a', b'b'], &[ValueType::Bytes]).is_err());
    }

    #[test]
    fn encode_key_prepends_big_endian_prefix() {
        let key = encode_key(100, &[Value::Int64(1)]);

        assert_eq!(&key[..4], &[0, 0, 0, 100]);
        assert_eq!(key.len(), 4 + 8);
    }

    #[test]
    fn keys_from_different_tables_never_interleave() {
        let a = encode_key(100, &[Value::Int64(i64::MAX)]);
        let b = encode_key(101, &[Value::Int64(i64::MIN)]);

        assert!(a < b);
    }
}
