//! Path operations on a JSON document tree
//!
//! Mirrors the hosted store's semantics: writing null deletes, empty objects
//! do not exist, and deleting the last child removes the parent.

use serde_json::{Map, Value};

/// Split a `/`-separated path, ignoring empty segments
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Drop null and empty-object children; the store never holds them
fn prune(value: &mut Value) {
    if let Value::Object(map) = value {
        for child in map.values_mut() {
            prune(child);
        }
        map.retain(|_, child| !is_empty(child));
    }
}

/// Value at `path`, `None` when absent
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = root;
    for segment in segments(path) {
        node = node.as_object()?.get(segment)?;
    }
    if is_empty(node) {
        None
    } else {
        Some(node)
    }
}

/// Overwrite the value at `path`; null or empty deletes and prunes empty parents
pub fn set(root: &mut Value, path: &str, mut value: Value) {
    prune(&mut value);
    let value = if is_empty(&value) { Value::Null } else { value };
    set_segments(root, &segments(path), value);
}

fn set_segments(node: &mut Value, path: &[&str], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *node = value;
        return;
    };

    if value.is_null() {
        if let Value::Object(map) = node {
            if rest.is_empty() {
                map.remove(*head);
            } else if let Some(child) = map.get_mut(*head) {
                set_segments(child, rest, value);
                if is_empty(child) {
                    map.remove(*head);
                }
            }
        }
        return;
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(head.to_string()).or_insert(Value::Null);
        set_segments(child, rest, value);
    }
}

/// Shallow merge: each field is set individually under `path`
pub fn merge(root: &mut Value, path: &str, fields: Map<String, Value>) {
    let base = segments(path);
    for (key, mut value) in fields {
        let mut full = base.clone();
        full.extend(segments(&key));
        prune(&mut value);
        let value = if is_empty(&value) { Value::Null } else { value };
        set_segments(root, &full, value);
    }
}

/// Replace every `{".sv": "timestamp"}` placeholder with `now_ms`
pub fn resolve_server_values(value: &mut Value, now_ms: u64) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 && map.get(".sv").and_then(Value::as_str) == Some("timestamp") {
                *value = Value::from(now_ms);
                return;
            }
            for child in map.values_mut() {
                resolve_server_values(child, now_ms);
            }
        }
        Value::Array(items) => {
            for item in items {
                resolve_server_values(item, now_ms);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_creates_intermediate_objects() {
        let mut root = json!({});
        set(&mut root, "room/player1/health", json!(1776));
        assert_eq!(get(&root, "room/player1/health"), Some(&json!(1776)));
        assert_eq!(root, json!({ "room": { "player1": { "health": 1776 } } }));
    }

    #[test]
    fn test_delete_prunes_empty_parents() {
        let mut root = json!({ "room": { "player1": { "x": 1 }, "player2": { "x": 2 } } });
        set(&mut root, "room/player1/x", Value::Null);
        assert_eq!(root, json!({ "room": { "player2": { "x": 2 } } }));
        set(&mut root, "room/player2", Value::Null);
        assert_eq!(root, json!({}));
        assert_eq!(get(&root, "room"), None);
    }

    #[test]
    fn test_merge_keeps_siblings() {
        let mut root = json!({ "room": { "player1": { "name": "Ann", "health": 1200 } } });
        let fields = json!({ "x": 5, "y": 380 }).as_object().cloned().unwrap();
        merge(&mut root, "room/player1", fields);
        assert_eq!(
            get(&root, "room/player1"),
            Some(&json!({ "name": "Ann", "health": 1200, "x": 5, "y": 380 }))
        );
    }

    #[test]
    fn test_merge_stores_empty_arrays() {
        let mut root = json!({ "p": { "bullets": [1, 2] } });
        let fields = json!({ "bullets": [], "x": 1 }).as_object().cloned().unwrap();
        merge(&mut root, "p", fields);
        // Empty arrays are stored as-is; only null and empty objects delete
        assert_eq!(get(&root, "p/bullets"), Some(&json!([])));
    }

    #[test]
    fn test_nested_nulls_are_not_stored() {
        let mut root = json!({});
        set(&mut root, "room/player1", json!({ "name": "Ann", "airstrikeTarget": null, "meta": {} }));
        assert_eq!(root, json!({ "room": { "player1": { "name": "Ann" } } }));
    }

    #[test]
    fn test_root_replace() {
        let mut root = json!({ "a": 1 });
        set(&mut root, "/", json!({ "b": 2 }));
        assert_eq!(root, json!({ "b": 2 }));
    }

    #[test]
    fn test_resolve_server_values() {
        let mut value = json!({ "x": 1, "updatedAt": { ".sv": "timestamp" }, "list": [{ ".sv": "timestamp" }] });
        resolve_server_values(&mut value, 42);
        assert_eq!(value, json!({ "x": 1, "updatedAt": 42, "list": [42] }));
    }
}
