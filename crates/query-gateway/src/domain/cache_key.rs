//! Deterministic cache keys for query results.
//!
//! The digest covers the trimmed query text and a canonical JSON rendering of
//! the parameters in which object keys are sorted at every depth, so the same
//! pairs in a different insertion order hash identically.

use crate::domain::types::{QueryHash, QueryParameters};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hash `query` and `parameters` into a [`QueryHash`].
pub fn derive_key(query: &str, parameters: &QueryParameters) -> QueryHash {
    let mut canonical = String::new();
    canonical.push('{');
    for (idx, (name, value)) in parameters.iter().enumerate() {
        if idx > 0 {
            canonical.push(',');
        }
        write_json_string(&mut canonical, name);
        canonical.push(':');
        write_canonical(&mut canonical, value);
    }
    canonical.push('}');

    let mut hasher = Sha256::new();
    hasher.update(query.trim().as_bytes());
    hasher.update(b":");
    hasher.update(canonical.as_bytes());
    QueryHash::from_hex(hex::encode(hasher.finalize()))
}

/// Full cache key for a hash under `prefix`.
pub fn cache_key(prefix: &str, hash: &QueryHash) -> String {
    format!("{prefix}{hash}")
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (idx, (key, nested)) in entries.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_json_string(out, key);
                out.push(':');
                write_canonical(out, nested);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_json_string(out: &mut String, s: &str) {
    out.push_str(&Value::String(s.to_string()).to_string());
}
