//! ContentHasher trait and canonical JSON encoding.
//!
//! Defined in runloom-core so the executor can hash step inputs without
//! coupling to a specific algorithm. The `Sha256ContentHasher` adapter lives
//! in runloom-infra.

use serde_json::Value;

/// Abstraction over content hashing.
///
/// Used to compute step input hashes, which address the step cache.
pub trait ContentHasher: Send + Sync {
    /// Compute a hex-encoded hash of the given content.
    fn compute_hash(&self, content: &str) -> String;
}

/// Hash a JSON value so that structurally equal values always agree,
/// regardless of object key insertion order.
pub fn hash_value(hasher: &dyn ContentHasher, value: &Value) -> String {
    hasher.compute_hash(&canonical_json(value))
}

/// Serialize `value` with object keys sorted at every depth and no whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
