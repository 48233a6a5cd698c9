//! Applying structural changes and assembling merged content.

use serde_json::{Map, Value};

use crate::diff::SCENARIOS_ROOT;
use crate::errors::{CoreResult, DatabaseError};
use crate::models::{
    ChangeType, ConfigChange, ConflictKind, Diff, KeyPath, MergeConflict, PathSegment,
    SnapshotContent,
};

use super::conflicts::scenarios_doc;

/// Set `value` at `path`, creating intermediate containers.
///
/// A key step turns a non-object into an empty object, an index step turns
/// a non-array into an empty array; an index at or past the end appends.
pub fn set_at(doc: &mut Value, path: &KeyPath, value: Value) {
    let mut current = doc;
    for segment in path.segments() {
        current = match segment {
            PathSegment::Key(key) => {
                if !current.is_object() {
                    *current = Value::Object(Map::new());
                }
                let Value::Object(map) = current else {
                    return;
                };
                map.entry(key.clone()).or_insert(Value::Null)
            }
            PathSegment::Index(idx) => {
                if !current.is_array() {
                    *current = Value::Array(Vec::new());
                }
                let Value::Array(items) = current else {
                    return;
                };
                if *idx >= items.len() {
                    items.push(Value::Null);
                    let last = items.len() - 1;
                    &mut items[last]
                } else {
                    &mut items[*idx]
                }
            }
        };
    }
    *current = value;
}

/// Remove the value at `path`; missing paths are left alone. Removing the
/// root leaves an empty object.
pub fn remove_at(doc: &mut Value, path: &KeyPath) {
    let Some((last, parents)) = path.segments().split_last() else {
        *doc = Value::Object(Map::new());
        return;
    };
    let mut current = doc;
    for segment in parents {
        let next = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get_mut(key),
            (PathSegment::Index(idx), Value::Array(items)) => items.get_mut(*idx),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return,
        }
    }
    match (last, current) {
        (PathSegment::Key(key), Value::Object(map)) => {
            map.remove(key);
        }
        (PathSegment::Index(idx), Value::Array(items)) if *idx < items.len() => {
            items.remove(*idx);
        }
        _ => {}
    }
}

/// Apply a change list: all sets in order, then removals deepest index
/// first so that array positions stay valid.
pub fn apply_changes<'a>(doc: &mut Value, changes: impl IntoIterator<Item = &'a ConfigChange>) {
    let mut removals = Vec::new();
    for change in changes {
        match (&change.change_type, &change.new_value) {
            (ChangeType::Removed, _) | (_, None) => removals.push(&change.key_path),
            (_, Some(value)) => set_at(doc, &change.key_path, value.clone()),
        }
    }
    removals.sort_unstable_by(|a, b| b.cmp(a));
    for path in removals {
        remove_at(doc, path);
    }
}

fn settled_roots<'a>(settled: &'a [Settled<'_>], kind: ConflictKind) -> Vec<&'a KeyPath> {
    settled
        .iter()
        .filter(|s| s.conflict.kind == kind)
        .filter_map(|s| s.conflict.key_path.as_ref())
        .collect()
}

fn outside(roots: &[&KeyPath], change: &ConfigChange) -> bool {
    !roots.iter().any(|root| root.is_prefix_of(&change.key_path))
}

/// A conflict together with the value its resolution settled on.
pub struct Settled<'a> {
    pub conflict: &'a MergeConflict,
    pub value: Option<Value>,
}

/// Merged content: the target head plus every non-conflicting source change
/// plus every resolved value.
pub fn build_merged_content(
    target: &SnapshotContent,
    source: &SnapshotContent,
    source_diff: &Diff,
    settled: &[Settled<'_>],
) -> CoreResult<SnapshotContent> {
    let mut merged = target.clone();

    let code_conflicts: Vec<&str> = settled
        .iter()
        .filter(|s| s.conflict.kind == ConflictKind::Code)
        .map(|s| s.conflict.path.as_str())
        .collect();
    for change in &source_diff.code_changes {
        if code_conflicts.contains(&change.path.as_str()) {
            continue;
        }
        match source.code_files.get(&change.path) {
            Some(text) => {
                merged.code_files.insert(change.path.clone(), text.clone());
            }
            None => {
                merged.code_files.remove(&change.path);
            }
        }
    }

    let config_roots = settled_roots(settled, ConflictKind::Config);
    apply_changes(
        &mut merged.config,
        source_diff
            .config_changes
            .iter()
            .filter(|c| outside(&config_roots, c)),
    );

    let scenario_roots = settled_roots(settled, ConflictKind::Scenario);
    let mut scenarios = scenarios_doc(target);
    apply_changes(
        &mut scenarios,
        source_diff
            .scenario_changes
            .iter()
            .filter(|c| outside(&scenario_roots, c)),
    );

    for s in settled {
        match s.conflict.kind {
            ConflictKind::Code => match &s.value {
                Some(Value::String(text)) => {
                    merged.code_files.insert(s.conflict.path.clone(), text.clone());
                }
                None => {
                    merged.code_files.remove(&s.conflict.path);
                }
                Some(other) => {
                    return Err(DatabaseError::CorruptValue {
                        column: "conflict_resolutions.resolved_value".into(),
                        value: other.to_string(),
                    }
                    .into())
                }
            },
            ConflictKind::Config | ConflictKind::Scenario => {
                let doc = if s.conflict.kind == ConflictKind::Config {
                    &mut merged.config
                } else {
                    &mut scenarios
                };
                let root = s.conflict.key_path.clone().unwrap_or_default();
                match &s.value {
                    Some(value) => set_at(doc, &root, value.clone()),
                    None => remove_at(doc, &root),
                }
            }
        }
    }

    merged.scenarios = match scenarios.get_mut(SCENARIOS_ROOT).map(Value::take) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff_contents;
    use crate::models::ResolutionStatus;
    use chrono::Utc;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn path(segments: Value) -> KeyPath {
        serde_json::from_value(segments).unwrap()
    }

    #[test]
    fn test_set_creates_intermediate_objects() {
        let mut doc = json!({});
        set_at(&mut doc, &path(json!(["env", "db", "host"])), json!("x"));
        assert_eq!(doc, json!({"env": {"db": {"host": "x"}}}));
    }

    #[test]
    fn test_set_index_past_end_appends() {
        let mut doc = json!({"tags": ["a"]});
        set_at(&mut doc, &path(json!(["tags", 5])), json!("b"));
        assert_eq!(doc, json!({"tags": ["a", "b"]}));
        set_at(&mut doc, &path(json!(["tags", 0])), json!("z"));
        assert_eq!(doc, json!({"tags": ["z", "b"]}));
    }

    #[test]
    fn test_remove_missing_path_is_noop() {
        let mut doc = json!({"a": 1});
        remove_at(&mut doc, &path(json!(["b", "c"])));
        remove_at(&mut doc, &path(json!(["a", 3])));
        assert_eq!(doc, json!({"a": 1}));
    }

    #[test]
    fn test_array_removals_apply_highest_index_first() {
        let old = json!({"tags": ["a", "b", "c", "d"]});
        let new = json!({"tags": ["a", "b"]});
        let mut changes = Vec::new();
        crate::diff::json::diff_values(&KeyPath::root(), Some(&old), Some(&new), &mut changes);

        let mut doc = old.clone();
        apply_changes(&mut doc, &changes);
        assert_eq!(doc, new);
    }

    #[test]
    fn test_applying_a_diff_reproduces_the_target() {
        let old = json!({"a": [1, {"b": 2}, 3], "c": {"d": true}, "e": "x"});
        let new = json!({"a": [1, {"b": 5, "n": null}], "c": "flat", "f": [1]});
        let mut changes = Vec::new();
        crate::diff::json::diff_values(&KeyPath::root(), Some(&old), Some(&new), &mut changes);

        let mut doc = old.clone();
        apply_changes(&mut doc, &changes);
        assert_eq!(doc, new);
    }

    #[test]
    fn test_merged_content_combines_sides_and_resolutions() {
        let mut base = SnapshotContent::with_config(json!({"timeout": 10, "retries": 1}));
        base.code_files.insert("a.spec".into(), "a\n".into());
        base.code_files.insert("b.spec".into(), "b\n".into());

        let mut source = base.clone();
        source.config = json!({"timeout": 20, "retries": 1, "headless": true});
        source.code_files.insert("a.spec".into(), "a2\n".into());
        source.code_files.remove("b.spec");
        source.scenarios.push(json!({"name": "login"}));

        let mut target = base.clone();
        target.config = json!({"timeout": 30, "retries": 2});

        let diff = diff_contents("base", "src", &base, &source, usize::MAX, &CancellationToken::new())
            .unwrap();
        let conflict = MergeConflict {
            id: "c1".into(),
            merge_request_id: "mr".into(),
            path: "timeout".into(),
            key_path: Some(KeyPath::key("timeout")),
            kind: ConflictKind::Config,
            base_value: Some(json!(10)),
            source_value: Some(json!(20)),
            target_value: Some(json!(30)),
            resolution_status: ResolutionStatus::Resolved,
            created_at: Utc::now(),
        };
        let settled = [Settled {
            conflict: &conflict,
            value: Some(json!(25)),
        }];

        let merged = build_merged_content(&target, &source, &diff, &settled).unwrap();
        assert_eq!(merged.config, json!({"timeout": 25, "retries": 2, "headless": true}));
        assert_eq!(merged.code_files.get("a.spec").map(String::as_str), Some("a2\n"));
        assert!(!merged.code_files.contains_key("b.spec"));
        assert_eq!(merged.scenarios, vec![json!({"name": "login"})]);
    }
}
