//! Merge base selection in the branch tree.

use rusqlite::Connection;
use tracing::debug;

use crate::branch::lineage_in;
use crate::db::queries;
use crate::errors::{CoreError, CoreResult};
use crate::models::{Branch, Snapshot};

/// Pick the snapshot both sides last agreed on.
///
/// With `L` the lowest common ancestor branch of `source` and `target`:
/// when `L` is the target, the base is the fork point of the source-side
/// child of `L`; otherwise it is the earlier of the two fork points taken
/// from `L`. A target lying below the source is rejected.
pub(crate) fn resolve_base(
    conn: &Connection,
    source: &Branch,
    target: &Branch,
) -> CoreResult<Snapshot> {
    let source_line = lineage_in(conn, source.clone())?;
    let target_line = lineage_in(conn, target.clone())?;

    if target_line.iter().any(|b| b.id == source.id) {
        return Err(CoreError::validation(format!(
            "cannot merge '{}' into its descendant '{}'",
            source.name, target.name
        )));
    }

    let (source_idx, lca) = source_line
        .iter()
        .enumerate()
        .find(|(_, b)| target_line.iter().any(|t| t.id == b.id))
        .ok_or_else(|| {
            CoreError::validation(format!(
                "branches '{}' and '{}' share no ancestor",
                source.name, target.name
            ))
        })?;

    let source_child = source_idx
        .checked_sub(1)
        .and_then(|i| source_line.get(i))
        .ok_or_else(|| CoreError::validation(format!("'{}' is an ancestor of '{}'", source.name, target.name)))?;
    let source_fork = fork_snapshot(conn, source_child)?;

    if lca.id == target.id {
        debug!(lca = %lca.name, base = %source_fork.id, "target is the common ancestor");
        return Ok(source_fork);
    }

    let target_idx = target_line
        .iter()
        .position(|b| b.id == lca.id)
        .unwrap_or_default();
    let target_child = &target_line[target_idx.saturating_sub(1)];
    let target_fork = fork_snapshot(conn, target_child)?;

    let base = if source_fork.seq <= target_fork.seq {
        source_fork
    } else {
        target_fork
    };
    debug!(lca = %lca.name, base = %base.id, "sibling lines, earlier fork point");
    Ok(base)
}

fn fork_snapshot(conn: &Connection, branch: &Branch) -> CoreResult<Snapshot> {
    let fork_id = branch.forked_from_snapshot_id.as_deref().ok_or_else(|| {
        CoreError::validation(format!("branch '{}' has no fork point", branch.name))
    })?;
    queries::get_snapshot(conn, fork_id)?.ok_or_else(|| CoreError::not_found("snapshot", fork_id))
}
