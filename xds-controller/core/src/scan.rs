//! Generic traversal of JSON-encoded configuration payloads.
//!
//! Envoy extensions that the controller does not model are carried as opaque JSON. Cluster
//! references inside them are recovered by walking the document and collecting string values
//! stored under well-known field names.

use serde_json::Value;

/// Documents nested deeper than this are not descended into.
pub const MAX_DEPTH: usize = 50;

/// Appends every string found under one of `fields` anywhere in `value` to `out`.
///
/// Empty strings are ignored. Traversal order is depth-first in document order.
pub fn find_string_fields(value: &Value, fields: &[&str], out: &mut Vec<String>) {
    walk(value, fields, out, 0)
}

fn walk(value: &Value, fields: &[&str], out: &mut Vec<String>, depth: usize) {
    if depth > MAX_DEPTH {
        return;
    }
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                if let Value::String(s) = v {
                    if !s.is_empty() && fields.contains(&k.as_str()) {
                        out.push(s.clone());
                    }
                    continue;
                }
                walk(v, fields, out, depth + 1);
            }
        }
        Value::Array(items) => {
            for v in items {
                walk(v, fields, out, depth + 1);
            }
        }
        _ => {}
    }
}
