//! Structured comparison of two snapshots.
//!
//! Code files are compared line by line, the config object and the scenario
//! list structurally by key path. Output ordering depends only on the
//! inputs: file paths and object keys are visited in sorted order.

pub mod json;
pub mod lines;
pub mod merge3;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span};

use crate::config::DiffConfig;
use crate::db::{queries, Database};
use crate::errors::{CoreError, CoreResult};
use crate::models::{ChangeType, CodeChange, Diff, KeyPath, Snapshot, SnapshotContent};

/// Root key under which scenario changes are reported.
pub const SCENARIOS_ROOT: &str = "scenarios";

/// Computes diffs between stored snapshots.
pub struct DiffEngine {
    db: Arc<Database>,
    max_lcs_cells: usize,
}

impl DiffEngine {
    pub fn new(db: Arc<Database>, config: &DiffConfig) -> Self {
        Self {
            db,
            max_lcs_cells: config.max_lcs_cells,
        }
    }

    /// Diff two snapshots by id.
    pub fn diff(&self, from_id: &str, to_id: &str) -> CoreResult<Diff> {
        self.diff_cancellable(from_id, to_id, &CancellationToken::new())
    }

    /// Like [`diff`](Self::diff), aborting with [`CoreError::Cancelled`] once
    /// `cancel` fires.
    pub fn diff_cancellable(
        &self,
        from_id: &str,
        to_id: &str,
        cancel: &CancellationToken,
    ) -> CoreResult<Diff> {
        let (from, to) = self.db.read(|conn| -> CoreResult<(Snapshot, Snapshot)> {
            let from = queries::get_snapshot(conn, from_id)?
                .ok_or_else(|| CoreError::not_found("snapshot", from_id))?;
            let to = queries::get_snapshot(conn, to_id)?
                .ok_or_else(|| CoreError::not_found("snapshot", to_id))?;
            Ok((from, to))
        })?;
        self.diff_snapshots(&from, &to, cancel)
    }

    /// Diff two already loaded snapshots.
    pub fn diff_snapshots(
        &self,
        from: &Snapshot,
        to: &Snapshot,
        cancel: &CancellationToken,
    ) -> CoreResult<Diff> {
        diff_contents(
            &from.id,
            &to.id,
            &from.content,
            &to.content,
            self.max_lcs_cells,
            cancel,
        )
    }
}

/// Diff two in-memory contents.
pub fn diff_contents(
    from_id: &str,
    to_id: &str,
    from: &SnapshotContent,
    to: &SnapshotContent,
    max_cells: usize,
    cancel: &CancellationToken,
) -> CoreResult<Diff> {
    let _span = info_span!("diff", from = from_id, to = to_id).entered();

    let mut diff = Diff {
        from_snapshot_id: from_id.to_string(),
        to_snapshot_id: to_id.to_string(),
        code_changes: Vec::new(),
        config_changes: Vec::new(),
        scenario_changes: Vec::new(),
    };
    if from_id == to_id {
        return Ok(diff);
    }

    let paths: BTreeSet<&String> = from.code_files.keys().chain(to.code_files.keys()).collect();
    for path in paths {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let old = from.code_files.get(path);
        let new = to.code_files.get(path);
        let change_type = match (old, new) {
            (Some(a), Some(b)) if a == b => continue,
            (Some(_), Some(_)) => ChangeType::Modified,
            (None, Some(_)) => ChangeType::Added,
            (Some(_), None) => ChangeType::Removed,
            (None, None) => continue,
        };
        let line_ops = lines::line_ops(
            old.map(String::as_str).unwrap_or(""),
            new.map(String::as_str).unwrap_or(""),
            max_cells,
            cancel,
        )?;
        diff.code_changes.push(CodeChange {
            path: path.clone(),
            change_type,
            line_ops,
        });
    }

    json::diff_values(
        &KeyPath::root(),
        Some(&from.config),
        Some(&to.config),
        &mut diff.config_changes,
    );

    if from.scenarios != to.scenarios {
        json::diff_values(
            &KeyPath::key(SCENARIOS_ROOT),
            Some(&Value::Array(from.scenarios.clone())),
            Some(&Value::Array(to.scenarios.clone())),
            &mut diff.scenario_changes,
        );
    }

    debug!(
        code = diff.code_changes.len(),
        config = diff.config_changes.len(),
        scenarios = diff.scenario_changes.len(),
        "diff computed"
    );
    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfigChange, LineOp};
    use serde_json::json;

    fn content(files: &[(&str, &str)], scenarios: Value, config: Value) -> SnapshotContent {
        SnapshotContent {
            code_files: files
                .iter()
                .map(|(p, t)| (p.to_string(), t.to_string()))
                .collect(),
            scenarios: serde_json::from_value(scenarios).unwrap(),
            config,
        }
    }

    fn diff(a: &SnapshotContent, b: &SnapshotContent) -> Diff {
        diff_contents("a", "b", a, b, usize::MAX, &CancellationToken::new()).unwrap()
    }

    #[test]
    fn test_same_snapshot_id_is_empty() {
        let a = content(&[("x", "1\n")], json!([]), json!({}));
        let b = content(&[("x", "2\n")], json!([]), json!({}));
        let result = diff_contents("s", "s", &a, &b, usize::MAX, &CancellationToken::new()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_equal_content_is_empty() {
        let a = content(&[("x", "1\n")], json!([{"name": "login"}]), json!({"t": 1}));
        assert!(diff(&a, &a.clone()).is_empty());
    }

    #[test]
    fn test_code_changes_sorted_by_path() {
        let a = content(&[("b.spec", "x\n"), ("c.spec", "gone\n")], json!([]), json!({}));
        let b = content(&[("a.spec", "new\n"), ("b.spec", "y\n")], json!([]), json!({}));
        let result = diff(&a, &b);
        let summary: Vec<(&str, ChangeType)> = result
            .code_changes
            .iter()
            .map(|c| (c.path.as_str(), c.change_type))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a.spec", ChangeType::Added),
                ("b.spec", ChangeType::Modified),
                ("c.spec", ChangeType::Removed),
            ]
        );
        assert_eq!(
            result.code_changes[0].line_ops,
            vec![LineOp::Insert { lines: vec!["new\n".into()] }]
        );
    }

    #[test]
    fn test_scenarios_rooted_under_scenarios_key() {
        let a = content(&[], json!([{"name": "login"}]), json!({}));
        let b = content(&[], json!([{"name": "login"}, {"name": "logout"}]), json!({}));
        let result = diff(&a, &b);
        assert!(result.config_changes.is_empty());
        assert_eq!(result.scenario_changes.len(), 1);
        assert_eq!(result.scenario_changes[0].key_path.to_string(), "scenarios[1]");
        assert_eq!(result.scenario_changes[0].change_type, ChangeType::Added);
    }

    #[test]
    fn test_symmetry() {
        let a = content(&[("x", "1\n2\n")], json!([{"n": 1}]), json!({"a": 1, "b": {"c": 2}}));
        let b = content(&[("x", "1\n3\n"), ("y", "z\n")], json!([]), json!({"b": {"c": 3}, "d": 4}));
        let forward = diff(&a, &b);
        let backward = diff(&b, &a);

        let flip = |t: ChangeType| match t {
            ChangeType::Added => ChangeType::Removed,
            ChangeType::Removed => ChangeType::Added,
            ChangeType::Modified => ChangeType::Modified,
        };
        let swap = |c: &ConfigChange| ConfigChange {
            key_path: c.key_path.clone(),
            change_type: flip(c.change_type),
            old_value: c.new_value.clone(),
            new_value: c.old_value.clone(),
        };

        let swapped: Vec<ConfigChange> = forward.config_changes.iter().map(swap).collect();
        assert_eq!(swapped, backward.config_changes);
        let swapped: Vec<ConfigChange> = forward.scenario_changes.iter().map(swap).collect();
        assert_eq!(swapped, backward.scenario_changes);
        for (f, b) in forward.code_changes.iter().zip(&backward.code_changes) {
            assert_eq!(f.path, b.path);
            assert_eq!(flip(f.change_type), b.change_type);
        }
    }

    #[test]
    fn test_deterministic() {
        let a = content(&[("x", "1\n2\n3\n")], json!([]), json!({"z": 1, "a": [1, 2]}));
        let b = content(&[("x", "3\n2\n1\n")], json!([]), json!({"a": [2], "m": null}));
        assert_eq!(diff(&a, &b), diff(&a, &b));
    }

    #[test]
    fn test_cancellation_between_files() {
        let a = content(&[("x", "1\n")], json!([]), json!({}));
        let b = content(&[("x", "2\n")], json!([]), json!({}));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = diff_contents("a", "b", &a, &b, usize::MAX, &cancel);
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }
}
