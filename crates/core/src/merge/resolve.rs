//! Turning a [`Resolution`] into the concrete value stored for a conflict.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::diff::merge3::merge_lines;
use crate::errors::{CoreError, CoreResult};
use crate::models::{ConflictKind, MergeConflict, Resolution};

/// The value `resolution` settles `conflict` on; `None` removes the file or
/// key.
pub fn resolved_value(
    conflict: &MergeConflict,
    resolution: &Resolution,
    max_cells: usize,
) -> CoreResult<Option<Value>> {
    let incompatible = |detail: String| CoreError::IncompatibleResolution {
        conflict_id: conflict.id.clone(),
        detail,
    };

    match resolution {
        Resolution::Source => Ok(conflict.source_value.clone()),
        Resolution::Target => Ok(conflict.target_value.clone()),
        Resolution::Custom(value) => match (conflict.kind, value) {
            (ConflictKind::Code, None | Some(Value::String(_))) => Ok(value.clone()),
            (ConflictKind::Code, Some(other)) => Err(incompatible(format!(
                "code files take text, got {}",
                json_type(other)
            ))),
            (ConflictKind::Config | ConflictKind::Scenario, _) => Ok(value.clone()),
        },
        Resolution::Both => match conflict.kind {
            ConflictKind::Code => {
                let (Some(Value::String(ours)), Some(Value::String(theirs))) =
                    (&conflict.source_value, &conflict.target_value)
                else {
                    return Err(incompatible(
                        "one side removed the file; choose source, target or custom".into(),
                    ));
                };
                let base = match &conflict.base_value {
                    Some(Value::String(text)) => text.as_str(),
                    _ => "",
                };
                merge_lines(base, ours, theirs, max_cells, &CancellationToken::new())?
                    .map(|merged| Some(Value::String(merged)))
                    .map_err(|overlap| incompatible(overlap.to_string()))
            }
            ConflictKind::Scenario if conflict.base_value.is_none() => Err(incompatible(
                "both sides added this independently; choose source, target or custom".into(),
            )),
            ConflictKind::Config | ConflictKind::Scenario => union_objects(
                conflict.base_value.as_ref(),
                conflict.source_value.as_ref(),
                conflict.target_value.as_ref(),
            )
            .map(|merged| Some(Value::Object(merged)))
            .map_err(incompatible),
        },
    }
}

/// Combine two objects whose changes against the base touch different keys.
fn union_objects(
    base: Option<&Value>,
    source: Option<&Value>,
    target: Option<&Value>,
) -> Result<Map<String, Value>, String> {
    let (Some(Value::Object(source)), Some(Value::Object(target))) = (source, target) else {
        return Err("both sides must be objects to keep both".into());
    };
    let empty = Map::new();
    let base = match base {
        Some(Value::Object(map)) => map,
        _ => &empty,
    };

    let changed = |side: &Map<String, Value>| -> BTreeSet<String> {
        base.keys()
            .chain(side.keys())
            .filter(|k| base.get(*k) != side.get(*k))
            .cloned()
            .collect()
    };
    let source_keys = changed(source);
    let target_keys = changed(target);
    let overlap: Vec<&String> = source_keys
        .intersection(&target_keys)
        .filter(|k| source.get(*k) != target.get(*k))
        .collect();
    if !overlap.is_empty() {
        let keys: Vec<&str> = overlap.iter().map(|k| k.as_str()).collect();
        return Err(format!("both sides changed key(s) {}", keys.join(", ")));
    }

    let mut merged = base.clone();
    for (side, keys) in [(source, &source_keys), (target, &target_keys)] {
        for key in keys {
            match side.get(key) {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
    }
    Ok(merged)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
