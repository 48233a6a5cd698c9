//! Structural comparison of JSON documents by key path.
//!
//! Objects are compared key by key in sorted order, arrays index by index
//! (order-sensitive). Any other pair of differing values, including a change
//! of type, is a single `modified` entry at that path.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::models::{ChangeType, ConfigChange, KeyPath, PathSegment};

/// Append every differing key path between `old` and `new` under `path`.
///
/// `None` stands for an absent key.
pub fn diff_values(
    path: &KeyPath,
    old: Option<&Value>,
    new: Option<&Value>,
    out: &mut Vec<ConfigChange>,
) {
    match (old, new) {
        (None, None) => {}
        (None, Some(added)) => out.push(ConfigChange {
            key_path: path.clone(),
            change_type: ChangeType::Added,
            old_value: None,
            new_value: Some(added.clone()),
        }),
        (Some(removed), None) => out.push(ConfigChange {
            key_path: path.clone(),
            change_type: ChangeType::Removed,
            old_value: Some(removed.clone()),
            new_value: None,
        }),
        (Some(Value::Object(a)), Some(Value::Object(b))) => {
            let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            for key in keys {
                diff_values(&path.child_key(key), a.get(key), b.get(key), out);
            }
        }
        (Some(Value::Array(a)), Some(Value::Array(b))) => {
            for idx in 0..a.len().max(b.len()) {
                diff_values(&path.child_index(idx), a.get(idx), b.get(idx), out);
            }
        }
        (Some(a), Some(b)) => {
            if a != b {
                out.push(ConfigChange {
                    key_path: path.clone(),
                    change_type: ChangeType::Modified,
                    old_value: Some(a.clone()),
                    new_value: Some(b.clone()),
                });
            }
        }
    }
}

/// Value at `path` inside `root`, or `None` when any step is missing.
pub fn lookup<'a>(root: &'a Value, path: &KeyPath) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.segments() {
        current = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key)?,
            (PathSegment::Index(idx), Value::Array(items)) => items.get(*idx)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn diff(old: &Value, new: &Value) -> Vec<ConfigChange> {
        let mut out = Vec::new();
        diff_values(&KeyPath::root(), Some(old), Some(new), &mut out);
        out
    }

    fn paths(changes: &[ConfigChange]) -> Vec<String> {
        changes.iter().map(|c| c.key_path.to_string()).collect()
    }

    #[test]
    fn test_equal_documents_have_no_changes() {
        let doc = json!({"a": [1, {"b": null}], "c": "x"});
        assert!(diff(&doc, &doc).is_empty());
    }

    #[test]
    fn test_nested_objects_compared_key_by_key() {
        let old = json!({"env": {"url": "a", "retries": 1}, "timeout": 10});
        let new = json!({"env": {"url": "b", "retries": 1, "proxy": true}});
        let changes = diff(&old, &new);
        assert_eq!(paths(&changes), vec!["env.proxy", "env.url", "timeout"]);
        assert_eq!(changes[0].change_type, ChangeType::Added);
        assert_eq!(changes[1].change_type, ChangeType::Modified);
        assert_eq!(changes[2].change_type, ChangeType::Removed);
        assert_eq!(changes[2].old_value, Some(json!(10)));
    }

    #[test]
    fn test_arrays_compared_by_index() {
        let old = json!({"tags": ["smoke", "fast"]});
        let new = json!({"tags": ["fast"]});
        let changes = diff(&old, &new);
        assert_eq!(paths(&changes), vec!["tags[0]", "tags[1]"]);
        assert_eq!(changes[0].change_type, ChangeType::Modified);
        assert_eq!(changes[1].change_type, ChangeType::Removed);
    }

    #[test]
    fn test_type_change_is_single_modification() {
        let changes = diff(&json!({"env": {"url": "a"}}), &json!({"env": "prod"}));
        assert_eq!(paths(&changes), vec!["env"]);
        assert_eq!(changes[0].change_type, ChangeType::Modified);
    }

    #[test]
    fn test_null_differs_from_absent() {
        let changes = diff(&json!({}), &json!({"a": null}));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Added);
        assert_eq!(changes[0].new_value, Some(Value::Null));
    }

    #[test]
    fn test_lookup() {
        let doc = json!({"env": {"hosts": [{"url": "x"}]}});
        let path = KeyPath::key("env").child_key("hosts").child_index(0).child_key("url");
        assert_eq!(lookup(&doc, &path), Some(&json!("x")));
        assert_eq!(lookup(&doc, &KeyPath::key("missing")), None);
        assert_eq!(lookup(&doc, &KeyPath::root()), Some(&doc));
    }
}
