//! Conflict detection between two diffs that share a base.
//!
//! A path conflicts when both sides touched it (or one touched an ancestor
//! of a path the other touched) and the two resulting values differ.
//! Nested touches are folded into one conflict at the shortest path, whose
//! values are the whole subtrees.
//!
//! Arrays are diffed by index, so an insert or delete on one side moves every
//! later element. When the other side touched any of the moved positions the
//! whole array becomes the conflict; its index-based changes are never
//! replayed onto the shifted array.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::diff::{json::lookup, SCENARIOS_ROOT};
use crate::models::{
    ChangeType, ConfigChange, ConflictKind, Diff, KeyPath, PathSegment, SnapshotContent,
};

/// A conflict found during merge request creation, before it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedConflict {
    pub kind: ConflictKind,
    pub path: String,
    pub key_path: Option<KeyPath>,
    pub base_value: Option<Value>,
    pub source_value: Option<Value>,
    pub target_value: Option<Value>,
}

/// The scenario list wrapped so that scenario key paths address into it.
pub(crate) fn scenarios_doc(content: &SnapshotContent) -> Value {
    let mut doc = Map::new();
    doc.insert(
        SCENARIOS_ROOT.to_string(),
        Value::Array(content.scenarios.clone()),
    );
    Value::Object(doc)
}

/// Find every conflict between `source_diff` and `target_diff`.
///
/// Both diffs must start from `base`; code conflicts come first (by path),
/// then config, then scenario conflicts (by key path).
pub fn detect_conflicts(
    base: &SnapshotContent,
    source: &SnapshotContent,
    target: &SnapshotContent,
    source_diff: &Diff,
    target_diff: &Diff,
) -> Vec<DetectedConflict> {
    let mut conflicts = Vec::new();

    let target_paths: BTreeSet<&str> = target_diff
        .code_changes
        .iter()
        .map(|c| c.path.as_str())
        .collect();
    for change in &source_diff.code_changes {
        if !target_paths.contains(change.path.as_str()) {
            continue;
        }
        let source_text = source.code_files.get(&change.path);
        let target_text = target.code_files.get(&change.path);
        if source_text == target_text {
            continue;
        }
        conflicts.push(DetectedConflict {
            kind: ConflictKind::Code,
            path: change.path.clone(),
            key_path: None,
            base_value: base.code_files.get(&change.path).cloned().map(Value::String),
            source_value: source_text.cloned().map(Value::String),
            target_value: target_text.cloned().map(Value::String),
        });
    }

    structural_conflicts(
        ConflictKind::Config,
        (&base.config, &source.config, &target.config),
        &source_diff.config_changes,
        &target_diff.config_changes,
        &mut conflicts,
    );

    let docs = (scenarios_doc(base), scenarios_doc(source), scenarios_doc(target));
    structural_conflicts(
        ConflictKind::Scenario,
        (&docs.0, &docs.1, &docs.2),
        &source_diff.scenario_changes,
        &target_diff.scenario_changes,
        &mut conflicts,
    );

    conflicts
}

/// Shortest paths where touches from both sides meet.
pub(crate) fn conflict_roots(source: &[ConfigChange], target: &[ConfigChange]) -> Vec<KeyPath> {
    let mut candidates = BTreeSet::new();
    for s in source {
        for t in target {
            if s.key_path.is_prefix_of(&t.key_path) {
                candidates.insert(s.key_path.clone());
            } else if t.key_path.is_prefix_of(&s.key_path) {
                candidates.insert(t.key_path.clone());
            }
        }
    }
    for (shifting, other) in [(source, target), (target, source)] {
        for (array, lowest) in shifted_arrays(shifting) {
            let touched = other
                .iter()
                .filter_map(|c| index_under(&array, &c.key_path))
                .any(|idx| idx >= lowest);
            if touched {
                candidates.insert(array);
            }
        }
    }
    candidates
        .iter()
        .filter(|path| {
            !candidates
                .iter()
                .any(|other| other != *path && other.is_prefix_of(path))
        })
        .cloned()
        .collect()
}

/// Arrays whose length `changes` alters, mapped to the lowest index the
/// same change list touches inside them. Elements from that index on may
/// have moved.
fn shifted_arrays(changes: &[ConfigChange]) -> BTreeMap<KeyPath, usize> {
    let mut shifted = BTreeMap::new();
    for change in changes {
        if change.change_type == ChangeType::Modified {
            continue;
        }
        if let Some((PathSegment::Index(_), parent)) = change.key_path.segments().split_last() {
            shifted.insert(KeyPath(parent.to_vec()), usize::MAX);
        }
    }
    for (array, lowest) in shifted.iter_mut() {
        for change in changes {
            if let Some(idx) = index_under(array, &change.key_path) {
                *lowest = (*lowest).min(idx);
            }
        }
    }
    shifted
}

/// Index of the element of `array` that `path` lies in, if any.
fn index_under(array: &KeyPath, path: &KeyPath) -> Option<usize> {
    if !array.is_prefix_of(path) {
        return None;
    }
    match path.segments().get(array.segments().len()) {
        Some(PathSegment::Index(idx)) => Some(*idx),
        _ => None,
    }
}

fn structural_conflicts(
    kind: ConflictKind,
    (base, source, target): (&Value, &Value, &Value),
    source_changes: &[ConfigChange],
    target_changes: &[ConfigChange],
    out: &mut Vec<DetectedConflict>,
) {
    for root in conflict_roots(source_changes, target_changes) {
        let source_value = lookup(source, &root).cloned();
        let target_value = lookup(target, &root).cloned();
        if source_value == target_value {
            continue;
        }
        out.push(DetectedConflict {
            kind,
            path: root.to_string(),
            base_value: lookup(base, &root).cloned(),
            key_path: Some(root),
            source_value,
            target_value,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff_contents;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn config(value: Value) -> SnapshotContent {
        SnapshotContent::with_config(value)
    }

    fn detect(
        base: &SnapshotContent,
        source: &SnapshotContent,
        target: &SnapshotContent,
    ) -> Vec<DetectedConflict> {
        let cancel = CancellationToken::new();
        let ds = diff_contents("b", "s", base, source, usize::MAX, &cancel).unwrap();
        let dt = diff_contents("b", "t", base, target, usize::MAX, &cancel).unwrap();
        detect_conflicts(base, source, target, &ds, &dt)
    }

    #[test]
    fn test_same_key_different_values_conflict() {
        let base = config(json!({"timeout": 10}));
        let found = detect(&base, &config(json!({"timeout": 20})), &config(json!({"timeout": 30})));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "timeout");
        assert_eq!(found[0].kind, ConflictKind::Config);
        assert_eq!(found[0].base_value, Some(json!(10)));
        assert_eq!(found[0].source_value, Some(json!(20)));
        assert_eq!(found[0].target_value, Some(json!(30)));
    }

    #[test]
    fn test_identical_changes_do_not_conflict() {
        let base = config(json!({"timeout": 10}));
        let both = config(json!({"timeout": 20}));
        assert!(detect(&base, &both, &both).is_empty());
    }

    #[test]
    fn test_disjoint_keys_do_not_conflict() {
        let base = config(json!({"a": 1, "b": 1}));
        let found = detect(&base, &config(json!({"a": 2, "b": 1})), &config(json!({"a": 1, "b": 2})));
        assert!(found.is_empty());
    }

    #[test]
    fn test_nested_touches_fold_to_shorter_path() {
        let base = config(json!({"env": {"url": "a", "port": 1}}));
        let source = config(json!({"env": "prod"}));
        let target = config(json!({"env": {"url": "b", "port": 1}}));
        let found = detect(&base, &source, &target);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "env");
        assert_eq!(found[0].source_value, Some(json!("prod")));
        assert_eq!(found[0].target_value, Some(json!({"url": "b", "port": 1})));
    }

    #[test]
    fn test_delete_versus_edit_conflicts() {
        let base = config(json!({"retries": 1}));
        let found = detect(&base, &config(json!({})), &config(json!({"retries": 2})));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source_value, None);
        assert_eq!(found[0].target_value, Some(json!(2)));
    }

    #[test]
    fn test_code_file_conflict() {
        let mut base = SnapshotContent::default();
        base.code_files.insert("login.spec".into(), "open\n".into());
        let mut source = base.clone();
        source.code_files.insert("login.spec".into(), "open\nclick\n".into());
        let mut target = base.clone();
        target.code_files.insert("login.spec".into(), "open\ntype\n".into());

        let found = detect(&base, &source, &target);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ConflictKind::Code);
        assert_eq!(found[0].path, "login.spec");
        assert!(found[0].key_path.is_none());
        assert_eq!(found[0].base_value, Some(json!("open\n")));
    }

    #[test]
    fn test_scenario_conflicts_use_scenario_paths() {
        let mut base = SnapshotContent::default();
        base.scenarios = vec![json!({"name": "login", "steps": 2})];
        let mut source = base.clone();
        source.scenarios[0]["steps"] = json!(3);
        let mut target = base.clone();
        target.scenarios[0]["steps"] = json!(4);

        let found = detect(&base, &source, &target);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ConflictKind::Scenario);
        assert_eq!(found[0].path, "scenarios[0].steps");
    }

    fn scenarios(items: Value) -> SnapshotContent {
        let mut content = SnapshotContent::default();
        content.scenarios = serde_json::from_value(items).unwrap();
        content
    }

    #[test]
    fn test_delete_shifting_an_edited_scenario_conflicts() {
        let base = scenarios(json!([{"name": "login"}, {"name": "logout"}]));
        let source = scenarios(json!([{"name": "login", "steps": 5}, {"name": "logout"}]));
        let target = scenarios(json!([{"name": "logout"}]));

        let found = detect(&base, &source, &target);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ConflictKind::Scenario);
        assert_eq!(found[0].path, "scenarios");
        assert_eq!(found[0].target_value, Some(json!([{"name": "logout"}])));
    }

    #[test]
    fn test_insert_shifting_an_edited_element_conflicts() {
        let base = config(json!({"hosts": ["a", "b"]}));
        let source = config(json!({"hosts": ["x", "a", "b"]}));
        let target = config(json!({"hosts": ["a", "B"]}));

        let found = detect(&base, &source, &target);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "hosts");
        assert_eq!(found[0].source_value, Some(json!(["x", "a", "b"])));
        assert_eq!(found[0].target_value, Some(json!(["a", "B"])));
    }

    #[test]
    fn test_different_appends_conflict() {
        let base = scenarios(json!([{"name": "login"}]));
        let source = scenarios(json!([{"name": "login"}, {"name": "search"}]));
        let target = scenarios(json!([{"name": "login"}, {"name": "cart"}]));

        let found = detect(&base, &source, &target);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "scenarios");
    }

    #[test]
    fn test_append_and_earlier_edit_do_not_conflict() {
        let base = scenarios(json!([{"name": "login"}, {"name": "logout"}]));
        let source = scenarios(json!([{"name": "login", "steps": 3}, {"name": "logout"}]));
        let target = scenarios(json!([{"name": "login"}, {"name": "logout"}, {"name": "cart"}]));
        assert!(detect(&base, &source, &target).is_empty());
    }

    #[test]
    fn test_shift_in_nested_array_stays_local() {
        let base = config(json!({"env": {"tags": ["a", "b"]}, "retries": 1}));
        let source = config(json!({"env": {"tags": ["b"]}, "retries": 1}));
        let target = config(json!({"env": {"tags": ["a", "c"]}, "retries": 2}));

        let found = detect(&base, &source, &target);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "env.tags");
    }

    #[test]
    fn test_roots_are_minimal() {
        let change = |path: KeyPath| ConfigChange {
            key_path: path,
            change_type: crate::models::ChangeType::Modified,
            old_value: None,
            new_value: None,
        };
        let a = KeyPath::key("a");
        let source = vec![change(a.clone()), change(a.child_key("x"))];
        let target = vec![change(a.child_key("x").child_key("y"))];
        assert_eq!(conflict_roots(&source, &target), vec![a]);
    }
}
