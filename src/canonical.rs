//! Canonical serialization and content hashing.
//!
//! Every hash in the system is computed over an explicitly ordered input:
//! object keys are sorted recursively and multi-part inputs are
//! length-prefixed before hashing, so identity never depends on map
//! iteration or filesystem walk order.

use serde_json::{Map, Value};

/// Recursively sort object keys, producing a canonical value.
///
/// Arrays keep their order (record order is meaningful); only object key
/// order is normalized.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (key, val) in entries {
                sorted.insert(key.clone(), canonicalize(val));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Serialize a value in canonical form: sorted keys, compact separators.
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

/// Content hash of raw bytes (hex-encoded blake3).
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

/// Content hash of one record in canonical form.
pub fn record_hash(value: &Value) -> String {
    content_hash(canonical_json(value).as_bytes())
}

/// Hash a sequence of string parts with length prefixes.
///
/// The length prefix keeps ("ab", "c") and ("a", "bc") distinct. Used for
/// all deterministic identifier derivation.
pub fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"d":2,"c":3}}"#).unwrap();
        assert_eq!(canonical_json(&a), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn test_reordered_objects_hash_identically() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":[{"b":2,"a":1}]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y":[{"a":1,"b":2}],"x":1}"#).unwrap();
        assert_eq!(record_hash(&a), record_hash(&b));
    }

    #[test]
    fn test_array_order_is_preserved() {
        let a = json!([1, 2]);
        let b = json!([2, 1]);
        assert_ne!(record_hash(&a), record_hash(&b));
    }

    #[test]
    fn test_hash_parts_length_prefix_distinguishes_boundaries() {
        assert_ne!(hash_parts(&["ab", "c"]), hash_parts(&["a", "bc"]));
    }

    #[test]
    fn test_hash_parts_deterministic() {
        assert_eq!(
            hash_parts(&["datashed:object", "proj", "a.txt"]),
            hash_parts(&["datashed:object", "proj", "a.txt"])
        );
    }
}
