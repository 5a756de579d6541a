//! Canonical JSON serialization helpers.
//!
//! Model artifacts are written with recursively sorted object keys so the same
//! ensemble always produces the same bytes and therefore the same blake3 hash.

use serde::{ser::Error as SerdeSerError, Serialize};
use serde_json::{self, map::Map, ser::PrettyFormatter, Serializer, Value};
use std::io::Write;

/// Recursively sort JSON object keys to obtain a canonical representation.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let mut sorted = Map::with_capacity(entries.len());
            for (key, val) in entries {
                sorted.insert(key, canonicalize(val));
            }

            Value::Object(sorted)
        }
        Value::Array(elements) => Value::Array(elements.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Serialize a value into indented canonical JSON and write it to `writer`.
pub fn write_canonical_json<T, W>(mut writer: W, value: &T) -> Result<(), serde_json::Error>
where
    T: Serialize,
    W: Write,
{
    let canonical_value = canonicalize(serde_json::to_value(value)?);
    let formatter = PrettyFormatter::with_indent(b"  ");
    let mut serializer = Serializer::with_formatter(&mut writer, formatter);
    canonical_value.serialize(&mut serializer)?;
    Ok(())
}

/// Serialize a value into indented canonical JSON and return it as a String.
pub fn canonical_json_string<T>(value: &T) -> Result<String, serde_json::Error>
where
    T: Serialize,
{
    let mut buffer = Vec::new();
    write_canonical_json(&mut buffer, value)?;
    String::from_utf8(buffer).map_err(|err| SerdeSerError::custom(err.to_string()))
}

/// Compact canonical JSON (sorted keys, no whitespace), the form that gets hashed.
pub fn canonical_json_compact<T>(value: &T) -> Result<String, serde_json::Error>
where
    T: Serialize,
{
    let canonical_value = canonicalize(serde_json::to_value(value)?);
    serde_json::to_string(&canonical_value)
}

/// Blake3 digest of the compact canonical JSON, hex encoded.
pub fn canonical_hash_hex<T>(value: &T) -> Result<String, serde_json::Error>
where
    T: Serialize,
{
    let json = canonical_json_compact(value)?;
    Ok(hex::encode(blake3::hash(json.as_bytes()).as_bytes()))
}
