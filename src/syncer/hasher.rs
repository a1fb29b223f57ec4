// ABOUTME: Row hasher - stable content digests for table rows
// ABOUTME: Also owns the canonical value serialization and primary key encoding

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use mysql_async::Value;
use sha2::{Digest, Sha256};
use std::fmt::Write;

use super::types::TableDefinition;
use crate::error::{Result, SyncError};

/// Width of a stored digest in hex characters (128 bits).
pub const DIGEST_HEX_LEN: usize = 32;

/// Width of the hash tables' `primary_key_value` column in characters.
pub const PRIMARY_KEY_VALUE_WIDTH: usize = 767;

/// Canonical textual form of a value; `None` for SQL NULL.
///
/// The text protocol returns everything as `Bytes`, the binary protocol
/// returns typed values. Both must produce the same canonical bytes so that
/// a row hashes identically regardless of how it was read.
pub fn canonical_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(bytes.clone()),
        Value::Int(i) => Some(i.to_string().into_bytes()),
        Value::UInt(u) => Some(u.to_string().into_bytes()),
        Value::Float(f) => Some(f.to_string().into_bytes()),
        Value::Double(d) => Some(d.to_string().into_bytes()),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let mut text = format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            );
            if *micros > 0 {
                let _ = write!(text, ".{:06}", micros);
            }
            Some(text.into_bytes())
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let total_hours = u64::from(*days) * 24 + u64::from(*hours);
            let mut text = format!(
                "{}{:02}:{:02}:{:02}",
                if *negative { "-" } else { "" },
                total_hours,
                minutes,
                seconds
            );
            if *micros > 0 {
                let _ = write!(text, ".{:06}", micros);
            }
            Some(text.into_bytes())
        }
    }
}

/// Digest of an ordered list of values.
///
/// Every value is framed as `N;` (NULL) or `V<len>:<bytes>;`, so NULL and
/// the empty string never collide and adjacent values cannot run together.
pub fn digest_values<'a, I>(values: I) -> String
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut hasher = Sha256::new();
    for value in values {
        match canonical_bytes(value) {
            None => hasher.update(b"N;"),
            Some(bytes) => {
                hasher.update(format!("V{}:", bytes.len()).as_bytes());
                hasher.update(&bytes);
                hasher.update(b";");
            }
        }
    }
    hex::encode(&hasher.finalize()[..DIGEST_HEX_LEN / 2])
}

/// Content hash of one full row, over the table's compared columns.
pub fn hash_row(table: &TableDefinition, row: &[Value]) -> String {
    let compared = table.compared_indexes();
    digest_values(compared.iter().map(|&i| row.get(i).unwrap_or(&Value::NULL)))
}

/// Digest stored in the `partition_value CHAR(32)` column.
pub fn partition_digest(value: &Value) -> Option<String> {
    canonical_bytes(value).map(|_| digest_values(std::iter::once(value)))
}

/// Encode a primary key tuple into the single `primary_key_value` string.
///
/// Each component is length-prefixed (`<len>:<text>`). Components that are
/// not plain ASCII are base64 encoded (`b<len>:<base64>`) and NULL is `N`.
/// No delimiter can appear inside a component, so distinct keys never
/// collide, and the result is always ASCII.
pub fn encode_key(values: &[Value]) -> String {
    let mut encoded = String::new();
    for value in values {
        match canonical_bytes(value) {
            None => encoded.push('N'),
            Some(bytes) if bytes.is_ascii() => {
                let _ = write!(encoded, "{}:", bytes.len());
                encoded.extend(bytes.iter().map(|&b| b as char));
            }
            Some(bytes) => {
                let packed = URL_SAFE_NO_PAD.encode(&bytes);
                let _ = write!(encoded, "b{}:{}", packed.len(), packed);
            }
        }
    }
    encoded
}

/// Inverse of [`encode_key`]. Components come back as `Value::Bytes`.
pub fn decode_key(encoded: &str) -> Result<Vec<Value>> {
    let malformed = || {
        SyncError::infrastructure(
            "sync",
            format!("Malformed primary_key_value '{}' in hash store", encoded),
        )
    };

    let mut values = Vec::new();
    let mut rest = encoded;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix('N') {
            values.push(Value::NULL);
            rest = tail;
            continue;
        }

        let (is_packed, body) = match rest.strip_prefix('b') {
            Some(tail) => (true, tail),
            None => (false, rest),
        };
        let (len, tail) = body.split_once(':').ok_or_else(malformed)?;
        let len: usize = len.parse().map_err(|_| malformed())?;
        let component = tail.get(..len).ok_or_else(malformed)?;
        let bytes = if is_packed {
            URL_SAFE_NO_PAD
                .decode(component)
                .map_err(|_| malformed())?
        } else {
            component.as_bytes().to_vec()
        };
        values.push(Value::Bytes(bytes));
        rest = &tail[len..];
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syncer::types::ColumnDefinition;

    fn text(s: &str) -> Value {
        Value::Bytes(s.as_bytes().to_vec())
    }

    fn logs_table() -> TableDefinition {
        TableDefinition::new(
            "logs",
            vec![
                ColumnDefinition::new("id", "int"),
                ColumnDefinition::new("message", "varchar"),
                ColumnDefinition::new("note", "text"),
            ],
            vec!["id".to_string()],
        )
    }

    #[test]
    fn test_digest_is_fixed_width_hex() {
        let digest = digest_values(&[text("a"), Value::NULL]);
        assert_eq!(digest.len(), DIGEST_HEX_LEN);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_identical_rows_hash_identically() {
        let table = logs_table();
        let a = vec![text("1"), text("hello"), Value::NULL];
        let b = vec![Value::Int(1), text("hello"), Value::NULL];
        assert_eq!(hash_row(&table, &a), hash_row(&table, &b));
    }

    #[test]
    fn test_null_and_empty_string_differ() {
        assert_ne!(digest_values(&[Value::NULL]), digest_values(&[text("")]));
    }

    #[test]
    fn test_adjacent_values_do_not_run_together() {
        assert_ne!(
            digest_values(&[text("ab"), text("c")]),
            digest_values(&[text("a"), text("bc")])
        );
    }

    #[test]
    fn test_any_compared_column_change_changes_hash() {
        let table = logs_table();
        let base = vec![text("1"), text("hello"), text("x")];
        let changed = vec![text("1"), text("hello"), text("y")];
        assert_ne!(hash_row(&table, &base), hash_row(&table, &changed));
    }

    #[test]
    fn test_typed_and_text_values_share_canonical_form() {
        assert_eq!(canonical_bytes(&Value::UInt(42)), Some(b"42".to_vec()));
        assert_eq!(
            canonical_bytes(&Value::Date(2024, 3, 9, 7, 5, 0, 0)),
            Some(b"2024-03-09 07:05:00".to_vec())
        );
        assert_eq!(
            canonical_bytes(&Value::Time(true, 1, 2, 3, 4, 500)),
            Some(b"-26:03:04.000500".to_vec())
        );
        assert_eq!(canonical_bytes(&Value::NULL), None);
    }

    #[test]
    fn test_composite_keys_do_not_collide() {
        let a = encode_key(&[text("a:b"), text("c")]);
        let b = encode_key(&[text("a"), text("b:c")]);
        assert_ne!(a, b);
        assert_eq!(a, "3:a:b1:c");
    }

    #[test]
    fn test_key_encoding_roundtrips_binary_and_null() {
        let key = vec![text("Zürich"), Value::Bytes(vec![0xff, 0x00, 0x10]), Value::NULL];
        let decoded = decode_key(&encode_key(&key)).unwrap();
        assert_eq!(decoded[0], text("Zürich"));
        assert_eq!(decoded[1], Value::Bytes(vec![0xff, 0x00, 0x10]));
        assert_eq!(decoded[2], Value::NULL);
    }

    #[test]
    fn test_non_ascii_keys_are_base64_encoded() {
        let encoded = encode_key(&[text("é")]);
        assert_eq!(encoded, "b3:w6k");
        assert!(encode_key(&[text("Zürich"), text("a")]).is_ascii());
    }

    #[test]
    fn test_full_width_accented_varchar_key_fits_column() {
        // VARCHAR(255) utf8mb4 of two-byte characters
        let key = vec![text(&"é".repeat(255))];
        let encoded = encode_key(&key);
        assert!(encoded.len() <= PRIMARY_KEY_VALUE_WIDTH, "{} chars", encoded.len());
        assert_eq!(decode_key(&encoded).unwrap(), key);
    }

    #[test]
    fn test_decode_rejects_malformed_keys() {
        assert!(decode_key("5:abc").is_err());
        assert!(decode_key("abc").is_err());
        assert!(decode_key("b3:a*c").is_err());
    }

    #[test]
    fn test_partition_digest() {
        assert_eq!(partition_digest(&Value::NULL), None);
        assert_eq!(
            partition_digest(&text("4")),
            partition_digest(&Value::Int(4))
        );
    }
}
