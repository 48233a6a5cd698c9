//! Typed query helpers for every table in the SuiteBranch database.
//!
//! All helpers take a `&Connection` (a `Transaction` derefs to one), so the
//! engines can run several of them inside a single
//! [`Database::transaction`](super::Database::transaction).

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::errors::DatabaseError;
use crate::models::{
    Branch, BranchStatus, ConflictResolution, HistoryAction, MergeConflict,
    MergeHistoryEntry, MergeRequest, MergeRequestStatus, Snapshot, SnapshotContent,
};

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
pub fn format_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn enum_column<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| conversion_error(idx, e))
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn opt_time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn opt_json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| serde_json::from_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn to_json<T: Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::CorruptValue {
        column: "json".into(),
        value: e.to_string(),
    })
}

fn opt_to_json<T: Serialize>(value: Option<&T>) -> Result<Option<String>, DatabaseError> {
    value.map(to_json).transpose()
}

// ---------------------------------------------------------------------------
// branches
// ---------------------------------------------------------------------------

const BRANCH_COLUMNS: &str = "id, suite_id, name, parent_branch_id, is_default, status,
     forked_from_snapshot_id, head_snapshot_id, created_at";

fn branch_from_row(row: &Row<'_>) -> rusqlite::Result<Branch> {
    Ok(Branch {
        id: row.get(0)?,
        suite_id: row.get(1)?,
        name: row.get(2)?,
        parent_branch_id: row.get(3)?,
        is_default: row.get(4)?,
        status: enum_column(row, 5)?,
        forked_from_snapshot_id: row.get(6)?,
        head_snapshot_id: row.get(7)?,
        created_at: time_column(row, 8)?,
    })
}

/// Insert a new branch row.
pub fn insert_branch(conn: &Connection, branch: &Branch) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO branches (id, suite_id, name, parent_branch_id, is_default, status,
         forked_from_snapshot_id, head_snapshot_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            branch.id,
            branch.suite_id,
            branch.name,
            branch.parent_branch_id,
            branch.is_default,
            branch.status.as_str(),
            branch.forked_from_snapshot_id,
            branch.head_snapshot_id,
            format_time(&branch.created_at),
        ],
    )?;
    debug!(id = %branch.id, suite_id = %branch.suite_id, name = %branch.name, "inserted branch");
    Ok(())
}

pub fn get_branch(conn: &Connection, id: &str) -> Result<Option<Branch>, DatabaseError> {
    let sql = format!("SELECT {BRANCH_COLUMNS} FROM branches WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], branch_from_row).optional()?)
}

pub fn get_default_branch(conn: &Connection, suite_id: &str) -> Result<Option<Branch>, DatabaseError> {
    let sql = format!("SELECT {BRANCH_COLUMNS} FROM branches WHERE suite_id = ?1 AND is_default = 1");
    Ok(conn.query_row(&sql, params![suite_id], branch_from_row).optional()?)
}

pub fn find_branch_by_name(
    conn: &Connection,
    suite_id: &str,
    name: &str,
) -> Result<Option<Branch>, DatabaseError> {
    let sql = format!("SELECT {BRANCH_COLUMNS} FROM branches WHERE suite_id = ?1 AND name = ?2");
    Ok(conn
        .query_row(&sql, params![suite_id, name], branch_from_row)
        .optional()?)
}

/// All branches of a suite in creation order.
pub fn list_branches(conn: &Connection, suite_id: &str) -> Result<Vec<Branch>, DatabaseError> {
    let sql = format!("SELECT {BRANCH_COLUMNS} FROM branches WHERE suite_id = ?1 ORDER BY rowid");
    let mut stmt = conn.prepare(&sql)?;
    let branches = stmt
        .query_map(params![suite_id], branch_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(branches)
}

pub fn list_child_branches(conn: &Connection, parent_id: &str) -> Result<Vec<Branch>, DatabaseError> {
    let sql = format!(
        "SELECT {BRANCH_COLUMNS} FROM branches WHERE parent_branch_id = ?1 ORDER BY rowid"
    );
    let mut stmt = conn.prepare(&sql)?;
    let branches = stmt
        .query_map(params![parent_id], branch_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(branches)
}

pub fn update_branch_name(conn: &Connection, id: &str, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE branches SET name = ?1 WHERE id = ?2",
        params![name, id],
    )?;
    debug!(id, name, "renamed branch");
    Ok(())
}

pub fn update_branch_status(
    conn: &Connection,
    id: &str,
    status: BranchStatus,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE branches SET status = ?1 WHERE id = ?2",
        params![status.as_str(), id],
    )?;
    debug!(id, status = %status, "updated branch status");
    Ok(())
}

/// Move a branch's head pointer.
pub fn set_branch_head(
    conn: &Connection,
    branch_id: &str,
    snapshot_id: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE branches SET head_snapshot_id = ?1 WHERE id = ?2",
        params![snapshot_id, branch_id],
    )?;
    Ok(())
}

/// Delete a branch; its snapshots are removed by `ON DELETE CASCADE`.
pub fn delete_branch(conn: &Connection, id: &str) -> Result<usize, DatabaseError> {
    let removed = conn.execute("DELETE FROM branches WHERE id = ?1", params![id])?;
    debug!(id, removed, "deleted branch");
    Ok(removed)
}

// ---------------------------------------------------------------------------
// snapshots
// ---------------------------------------------------------------------------

const SNAPSHOT_COLUMNS: &str =
    "id, branch_id, seq, captured_at, content_hash, code_files, scenarios, config";

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<Snapshot> {
    Ok(Snapshot {
        id: row.get(0)?,
        branch_id: row.get(1)?,
        seq: row.get(2)?,
        captured_at: time_column(row, 3)?,
        content_hash: row.get(4)?,
        content: SnapshotContent {
            code_files: json_column(row, 5)?,
            scenarios: json_column(row, 6)?,
            config: json_column(row, 7)?,
        },
    })
}

/// Insert a snapshot and return its store-assigned sequence number.
pub fn insert_snapshot(
    conn: &Connection,
    id: &str,
    branch_id: &str,
    captured_at: &DateTime<Utc>,
    content_hash: &str,
    content: &SnapshotContent,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO snapshots (id, branch_id, captured_at, content_hash, code_files, scenarios, config)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            branch_id,
            format_time(captured_at),
            content_hash,
            to_json(&content.code_files)?,
            to_json(&content.scenarios)?,
            to_json(&content.config)?,
        ],
    )?;
    let seq = conn.last_insert_rowid();
    debug!(id, branch_id, seq, content_hash, "inserted snapshot");
    Ok(seq)
}

pub fn get_snapshot(conn: &Connection, id: &str) -> Result<Option<Snapshot>, DatabaseError> {
    let sql = format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], snapshot_from_row).optional()?)
}

/// Most recent snapshot of a branch by capture time, ties broken by `seq`.
pub fn get_head_snapshot(conn: &Connection, branch_id: &str) -> Result<Option<Snapshot>, DatabaseError> {
    let sql = format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE branch_id = ?1
         ORDER BY captured_at DESC, seq DESC LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, params![branch_id], snapshot_from_row)
        .optional()?)
}

/// Snapshots of a branch in capture order.
pub fn list_snapshots(conn: &Connection, branch_id: &str) -> Result<Vec<Snapshot>, DatabaseError> {
    let sql = format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE branch_id = ?1 ORDER BY seq");
    let mut stmt = conn.prepare(&sql)?;
    let snapshots = stmt
        .query_map(params![branch_id], snapshot_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(snapshots)
}

// ---------------------------------------------------------------------------
// merge_requests
// ---------------------------------------------------------------------------

const MERGE_REQUEST_COLUMNS: &str = "id, source_branch_id, target_branch_id, base_snapshot_id,
     source_head_snapshot_id, target_head_snapshot_id, status, created_by, created_at,
     merged_at, merged_snapshot_id";

fn merge_request_from_row(row: &Row<'_>) -> rusqlite::Result<MergeRequest> {
    Ok(MergeRequest {
        id: row.get(0)?,
        source_branch_id: row.get(1)?,
        target_branch_id: row.get(2)?,
        base_snapshot_id: row.get(3)?,
        source_head_snapshot_id: row.get(4)?,
        target_head_snapshot_id: row.get(5)?,
        status: enum_column(row, 6)?,
        created_by: row.get(7)?,
        created_at: time_column(row, 8)?,
        merged_at: opt_time_column(row, 9)?,
        merged_snapshot_id: row.get(10)?,
    })
}

pub fn insert_merge_request(conn: &Connection, mr: &MergeRequest) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO merge_requests (id, source_branch_id, target_branch_id, base_snapshot_id,
         source_head_snapshot_id, target_head_snapshot_id, status, created_by, created_at,
         merged_at, merged_snapshot_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            mr.id,
            mr.source_branch_id,
            mr.target_branch_id,
            mr.base_snapshot_id,
            mr.source_head_snapshot_id,
            mr.target_head_snapshot_id,
            mr.status.as_str(),
            mr.created_by,
            format_time(&mr.created_at),
            mr.merged_at.as_ref().map(format_time),
            mr.merged_snapshot_id,
        ],
    )?;
    debug!(id = %mr.id, status = %mr.status, "inserted merge request");
    Ok(())
}

pub fn get_merge_request(conn: &Connection, id: &str) -> Result<Option<MergeRequest>, DatabaseError> {
    let sql = format!("SELECT {MERGE_REQUEST_COLUMNS} FROM merge_requests WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id], merge_request_from_row)
        .optional()?)
}

/// Merge requests in creation order, optionally only those touching a branch
/// as source or target.
pub fn list_merge_requests(
    conn: &Connection,
    branch_id: Option<&str>,
) -> Result<Vec<MergeRequest>, DatabaseError> {
    let requests = match branch_id {
        Some(branch_id) => {
            let sql = format!(
                "SELECT {MERGE_REQUEST_COLUMNS} FROM merge_requests
                 WHERE source_branch_id = ?1 OR target_branch_id = ?1 ORDER BY rowid"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![branch_id], merge_request_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let sql = format!("SELECT {MERGE_REQUEST_COLUMNS} FROM merge_requests ORDER BY rowid");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], merge_request_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(requests)
}

/// Number of open or conflicted requests that reference a branch.
pub fn count_active_merge_requests_for_branch(
    conn: &Connection,
    branch_id: &str,
) -> Result<i64, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM merge_requests
         WHERE (source_branch_id = ?1 OR target_branch_id = ?1)
           AND status IN ('open', 'conflict')",
        params![branch_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn update_merge_request_status(
    conn: &Connection,
    id: &str,
    status: MergeRequestStatus,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE merge_requests SET status = ?1 WHERE id = ?2",
        params![status.as_str(), id],
    )?;
    debug!(id, status = %status, "updated merge request status");
    Ok(())
}

pub fn mark_merge_request_merged(
    conn: &Connection,
    id: &str,
    merged_at: &DateTime<Utc>,
    merged_snapshot_id: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE merge_requests SET status = 'merged', merged_at = ?1, merged_snapshot_id = ?2
         WHERE id = ?3",
        params![format_time(merged_at), merged_snapshot_id, id],
    )?;
    debug!(id, merged_snapshot_id, "merge request merged");
    Ok(())
}

// ---------------------------------------------------------------------------
// merge_conflicts
// ---------------------------------------------------------------------------

const CONFLICT_COLUMNS: &str = "id, merge_request_id, path, key_path, kind, base_value,
     source_value, target_value, resolution_status, created_at";

fn conflict_from_row(row: &Row<'_>) -> rusqlite::Result<MergeConflict> {
    Ok(MergeConflict {
        id: row.get(0)?,
        merge_request_id: row.get(1)?,
        path: row.get(2)?,
        key_path: opt_json_column(row, 3)?,
        kind: enum_column(row, 4)?,
        base_value: opt_json_column(row, 5)?,
        source_value: opt_json_column(row, 6)?,
        target_value: opt_json_column(row, 7)?,
        resolution_status: enum_column(row, 8)?,
        created_at: time_column(row, 9)?,
    })
}

/// Insert a conflict; `ordinal` preserves detection order for listing.
pub fn insert_conflict(
    conn: &Connection,
    conflict: &MergeConflict,
    ordinal: usize,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO merge_conflicts (id, merge_request_id, ordinal, path, key_path, kind,
         base_value, source_value, target_value, resolution_status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            conflict.id,
            conflict.merge_request_id,
            ordinal as i64,
            conflict.path,
            opt_to_json(conflict.key_path.as_ref())?,
            conflict.kind.as_str(),
            opt_to_json(conflict.base_value.as_ref())?,
            opt_to_json(conflict.source_value.as_ref())?,
            opt_to_json(conflict.target_value.as_ref())?,
            conflict.resolution_status.as_str(),
            format_time(&conflict.created_at),
        ],
    )?;
    debug!(id = %conflict.id, path = %conflict.path, kind = %conflict.kind, "inserted conflict");
    Ok(())
}

pub fn get_conflict(conn: &Connection, id: &str) -> Result<Option<MergeConflict>, DatabaseError> {
    let sql = format!("SELECT {CONFLICT_COLUMNS} FROM merge_conflicts WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], conflict_from_row).optional()?)
}

/// Conflicts of a merge request in detection order.
pub fn list_conflicts(
    conn: &Connection,
    merge_request_id: &str,
) -> Result<Vec<MergeConflict>, DatabaseError> {
    let sql = format!(
        "SELECT {CONFLICT_COLUMNS} FROM merge_conflicts WHERE merge_request_id = ?1 ORDER BY ordinal"
    );
    let mut stmt = conn.prepare(&sql)?;
    let conflicts = stmt
        .query_map(params![merge_request_id], conflict_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(conflicts)
}

/// Ids of the conflicts still awaiting a resolution, in detection order.
pub fn pending_conflict_ids(
    conn: &Connection,
    merge_request_id: &str,
) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id FROM merge_conflicts
         WHERE merge_request_id = ?1 AND resolution_status = 'pending' ORDER BY ordinal",
    )?;
    let ids = stmt
        .query_map(params![merge_request_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

pub fn mark_conflict_resolved(conn: &Connection, id: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE merge_conflicts SET resolution_status = 'resolved' WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// conflict_resolutions
// ---------------------------------------------------------------------------

const RESOLUTION_COLUMNS: &str =
    "r.id, r.conflict_id, r.strategy, r.resolved_value, r.resolved_by, r.resolved_at";

fn resolution_from_row(row: &Row<'_>) -> rusqlite::Result<ConflictResolution> {
    Ok(ConflictResolution {
        id: row.get(0)?,
        conflict_id: row.get(1)?,
        strategy: enum_column(row, 2)?,
        resolved_value: opt_json_column(row, 3)?,
        resolved_by: row.get(4)?,
        resolved_at: time_column(row, 5)?,
    })
}

pub fn insert_resolution(
    conn: &Connection,
    resolution: &ConflictResolution,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO conflict_resolutions (id, conflict_id, strategy, resolved_value,
         resolved_by, resolved_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            resolution.id,
            resolution.conflict_id,
            resolution.strategy.as_str(),
            opt_to_json(resolution.resolved_value.as_ref())?,
            resolution.resolved_by,
            format_time(&resolution.resolved_at),
        ],
    )?;
    debug!(
        id = %resolution.id,
        conflict_id = %resolution.conflict_id,
        strategy = %resolution.strategy,
        "inserted resolution"
    );
    Ok(())
}

pub fn get_resolution_for_conflict(
    conn: &Connection,
    conflict_id: &str,
) -> Result<Option<ConflictResolution>, DatabaseError> {
    let sql = format!(
        "SELECT {RESOLUTION_COLUMNS} FROM conflict_resolutions r WHERE r.conflict_id = ?1"
    );
    Ok(conn
        .query_row(&sql, params![conflict_id], resolution_from_row)
        .optional()?)
}

/// Resolutions of every resolved conflict of a merge request.
pub fn list_resolutions(
    conn: &Connection,
    merge_request_id: &str,
) -> Result<Vec<ConflictResolution>, DatabaseError> {
    let sql = format!(
        "SELECT {RESOLUTION_COLUMNS} FROM conflict_resolutions r
         JOIN merge_conflicts c ON c.id = r.conflict_id
         WHERE c.merge_request_id = ?1 ORDER BY c.ordinal"
    );
    let mut stmt = conn.prepare(&sql)?;
    let resolutions = stmt
        .query_map(params![merge_request_id], resolution_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(resolutions)
}

// ---------------------------------------------------------------------------
// merge_history
// ---------------------------------------------------------------------------

/// Append a history entry and return its id.
pub fn append_history(
    conn: &Connection,
    merge_request_id: &str,
    action: HistoryAction,
    actor: &str,
    detail: Option<&str>,
) -> Result<i64, DatabaseError> {
    let now = format_time(&Utc::now());
    conn.execute(
        "INSERT INTO merge_history (merge_request_id, action, actor, timestamp, detail)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![merge_request_id, action.as_str(), actor, now, detail],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, merge_request_id, action = %action, actor, "appended merge history");
    Ok(id)
}

/// History of a merge request, oldest first.
pub fn list_history(
    conn: &Connection,
    merge_request_id: &str,
) -> Result<Vec<MergeHistoryEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, merge_request_id, action, actor, timestamp, detail
         FROM merge_history WHERE merge_request_id = ?1 ORDER BY id",
    )?;
    let entries = stmt
        .query_map(params![merge_request_id], |row| {
            Ok(MergeHistoryEntry {
                id: row.get(0)?,
                merge_request_id: row.get(1)?,
                action: enum_column::<HistoryAction>(row, 2)?,
                actor: row.get(3)?,
                timestamp: time_column(row, 4)?,
                detail: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{ConflictKind, KeyPath, ResolutionStatus, ResolutionStrategy};
    use serde_json::json;

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn branch(id: &str, name: &str, parent: Option<&str>) -> Branch {
        Branch {
            id: id.into(),
            suite_id: "suite".into(),
            name: name.into(),
            parent_branch_id: parent.map(str::to_string),
            is_default: parent.is_none(),
            status: BranchStatus::Active,
            forked_from_snapshot_id: None,
            head_snapshot_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_branch_crud() {
        let db = setup_db();
        let conn = db.conn();
        insert_branch(&conn, &branch("b1", "main", None)).unwrap();
        insert_branch(&conn, &branch("b2", "feature", Some("b1"))).unwrap();

        let fetched = get_branch(&conn, "b2").unwrap().unwrap();
        assert_eq!(fetched.parent_branch_id.as_deref(), Some("b1"));
        assert_eq!(get_default_branch(&conn, "suite").unwrap().unwrap().id, "b1");
        assert_eq!(list_branches(&conn, "suite").unwrap().len(), 2);
        assert_eq!(list_child_branches(&conn, "b1").unwrap().len(), 1);

        update_branch_status(&conn, "b2", BranchStatus::Archived).unwrap();
        update_branch_name(&conn, "b2", "renamed").unwrap();
        let fetched = find_branch_by_name(&conn, "suite", "renamed").unwrap().unwrap();
        assert_eq!(fetched.status, BranchStatus::Archived);

        assert!(get_branch(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_snapshot_head_follows_sequence() {
        let db = setup_db();
        let conn = db.conn();
        insert_branch(&conn, &branch("b1", "main", None)).unwrap();
        let at = Utc::now();
        let content = SnapshotContent::with_config(json!({"retries": 1}));
        let s1 = insert_snapshot(&conn, "s1", "b1", &at, "h1", &content).unwrap();
        let s2 = insert_snapshot(&conn, "s2", "b1", &at, "h2", &content).unwrap();
        assert!(s2 > s1);

        let head = get_head_snapshot(&conn, "b1").unwrap().unwrap();
        assert_eq!(head.id, "s2");
        assert_eq!(head.content.config["retries"], 1);
        assert_eq!(list_snapshots(&conn, "b1").unwrap().len(), 2);
    }

    #[test]
    fn test_conflict_values_keep_absent_distinct_from_null() {
        let db = setup_db();
        let conn = db.conn();
        let mr = MergeRequest {
            id: "mr".into(),
            source_branch_id: "a".into(),
            target_branch_id: "b".into(),
            base_snapshot_id: "s0".into(),
            source_head_snapshot_id: "s1".into(),
            target_head_snapshot_id: "s2".into(),
            status: MergeRequestStatus::Conflict,
            created_by: "alice".into(),
            created_at: Utc::now(),
            merged_at: None,
            merged_snapshot_id: None,
        };
        insert_merge_request(&conn, &mr).unwrap();
        let conflict = MergeConflict {
            id: "c1".into(),
            merge_request_id: "mr".into(),
            path: "timeout".into(),
            key_path: Some(KeyPath::key("timeout")),
            kind: ConflictKind::Config,
            base_value: None,
            source_value: Some(json!(null)),
            target_value: Some(json!(30)),
            resolution_status: ResolutionStatus::Pending,
            created_at: Utc::now(),
        };
        insert_conflict(&conn, &conflict, 0).unwrap();

        let fetched = get_conflict(&conn, "c1").unwrap().unwrap();
        assert_eq!(fetched.base_value, None);
        assert_eq!(fetched.source_value, Some(json!(null)));
        assert_eq!(fetched.key_path, Some(KeyPath::key("timeout")));
        assert_eq!(pending_conflict_ids(&conn, "mr").unwrap(), vec!["c1"]);

        insert_resolution(
            &conn,
            &ConflictResolution {
                id: "r1".into(),
                conflict_id: "c1".into(),
                strategy: ResolutionStrategy::Target,
                resolved_value: Some(json!(30)),
                resolved_by: "bob".into(),
                resolved_at: Utc::now(),
            },
        )
        .unwrap();
        mark_conflict_resolved(&conn, "c1").unwrap();
        assert!(pending_conflict_ids(&conn, "mr").unwrap().is_empty());
        assert_eq!(list_resolutions(&conn, "mr").unwrap().len(), 1);
        assert_eq!(
            get_resolution_for_conflict(&conn, "c1").unwrap().unwrap().resolved_value,
            Some(json!(30))
        );
    }

    #[test]
    fn test_history_append_and_list() {
        let db = setup_db();
        let conn = db.conn();
        append_history(&conn, "mr", HistoryAction::Created, "alice", None).unwrap();
        append_history(&conn, "mr", HistoryAction::Closed, "bob", Some("stale")).unwrap();

        let history = list_history(&conn, "mr").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, HistoryAction::Created);
        assert_eq!(history[1].detail.as_deref(), Some("stale"));
    }
}
