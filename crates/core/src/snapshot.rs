//! Capturing and reading immutable branch snapshots.
//!
//! A capture normalizes the payload, hashes it, and either returns the
//! current head (same hash) or appends a new snapshot and moves the branch
//! head pointer, all inside one transaction.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{queries, Database};
use crate::errors::{CoreError, CoreResult};
use crate::models::{Branch, Snapshot, SnapshotContent};

/// Records and serves snapshots.
pub struct SnapshotEngine {
    db: Arc<Database>,
}

impl SnapshotEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Capture `content` as the new head of `branch_id`.
    pub fn capture_snapshot(&self, branch_id: &str, content: SnapshotContent) -> CoreResult<Snapshot> {
        self.db.transaction(|conn| {
            let branch = queries::get_branch(conn, branch_id)?
                .ok_or_else(|| CoreError::not_found("branch", branch_id))?;
            capture_in(conn, &branch, content)
        })
    }

    pub fn get_snapshot(&self, id: &str) -> CoreResult<Snapshot> {
        self.db.read(|conn| {
            queries::get_snapshot(conn, id)?.ok_or_else(|| CoreError::not_found("snapshot", id))
        })
    }

    pub fn get_head_snapshot(&self, branch_id: &str) -> CoreResult<Snapshot> {
        self.db.read(|conn| head_in(conn, branch_id))
    }

    /// Snapshots of a branch, oldest first.
    pub fn list_snapshots(&self, branch_id: &str) -> CoreResult<Vec<Snapshot>> {
        self.db.read(|conn| {
            if queries::get_branch(conn, branch_id)?.is_none() {
                return Err(CoreError::not_found("branch", branch_id));
            }
            Ok(queries::list_snapshots(conn, branch_id)?)
        })
    }
}

/// Head snapshot of a branch inside an open connection or transaction.
pub(crate) fn head_in(conn: &Connection, branch_id: &str) -> CoreResult<Snapshot> {
    if queries::get_branch(conn, branch_id)?.is_none() {
        return Err(CoreError::not_found("branch", branch_id));
    }
    queries::get_head_snapshot(conn, branch_id)?
        .ok_or_else(|| CoreError::not_found("snapshot", format!("head of branch {branch_id}")))
}

/// Capture inside an open transaction. Shared by branch creation and merge
/// execution so that the new head lands in the caller's transaction.
pub(crate) fn capture_in(
    conn: &Connection,
    branch: &Branch,
    content: SnapshotContent,
) -> CoreResult<Snapshot> {
    if branch.status.is_read_only() {
        return Err(CoreError::validation(format!(
            "branch '{}' is {} and accepts no new snapshots",
            branch.name, branch.status
        )));
    }
    if !content.config.is_object() {
        return Err(CoreError::validation("snapshot config must be a JSON object"));
    }

    let content = content.normalized();
    let content_hash = content.content_hash()?;

    let head = queries::get_head_snapshot(conn, &branch.id)?;
    if let Some(head) = &head {
        if head.content_hash == content_hash {
            debug!(branch_id = %branch.id, snapshot_id = %head.id, "content unchanged, keeping head");
            return Ok(head.clone());
        }
    }

    // Capture times never go backwards on a branch.
    let mut captured_at = Utc::now();
    if let Some(head) = &head {
        if head.captured_at > captured_at {
            captured_at = head.captured_at;
        }
    }

    let id = Uuid::new_v4().to_string();
    let seq = queries::insert_snapshot(conn, &id, &branch.id, &captured_at, &content_hash, &content)?;
    queries::set_branch_head(conn, &branch.id, &id)?;

    info!(
        branch_id = %branch.id,
        snapshot_id = %id,
        seq,
        files = content.code_files.len(),
        scenarios = content.scenarios.len(),
        "captured snapshot"
    );

    Ok(Snapshot {
        id,
        branch_id: branch.id.clone(),
        seq,
        captured_at,
        content_hash,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BranchStatus;
    use serde_json::json;

    fn setup() -> (Arc<Database>, SnapshotEngine) {
        let db = Arc::new(Database::in_memory().unwrap());
        db.initialize().unwrap();
        let branch = Branch {
            id: "b1".into(),
            suite_id: "suite".into(),
            name: "main".into(),
            parent_branch_id: None,
            is_default: true,
            status: BranchStatus::Active,
            forked_from_snapshot_id: None,
            head_snapshot_id: None,
            created_at: Utc::now(),
        };
        queries::insert_branch(&db.conn(), &branch).unwrap();
        let engine = SnapshotEngine::new(db.clone());
        (db, engine)
    }

    fn payload(step: &str) -> SnapshotContent {
        let mut content = SnapshotContent::with_config(json!({"timeout": 10}));
        content.code_files.insert("login.spec".into(), format!("{step}\n"));
        content
    }

    #[test]
    fn test_capture_moves_head() {
        let (db, engine) = setup();
        let first = engine.capture_snapshot("b1", payload("open")).unwrap();
        let second = engine.capture_snapshot("b1", payload("close")).unwrap();
        assert_ne!(first.id, second.id);
        assert!(second.seq > first.seq);

        assert_eq!(engine.get_head_snapshot("b1").unwrap().id, second.id);
        let branch = queries::get_branch(&db.conn(), "b1").unwrap().unwrap();
        assert_eq!(branch.head_snapshot_id.as_deref(), Some(second.id.as_str()));
        assert_eq!(engine.list_snapshots("b1").unwrap().len(), 2);
    }

    #[test]
    fn test_identical_capture_returns_existing_head() {
        let (_db, engine) = setup();
        let first = engine.capture_snapshot("b1", payload("open")).unwrap();
        let again = engine.capture_snapshot("b1", payload("open")).unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(engine.list_snapshots("b1").unwrap().len(), 1);
    }

    #[test]
    fn test_crlf_normalized_before_hashing() {
        let (_db, engine) = setup();
        let first = engine.capture_snapshot("b1", payload("open")).unwrap();
        let mut crlf = payload("open");
        crlf.code_files.insert("login.spec".into(), "open\r\n".into());
        let again = engine.capture_snapshot("b1", crlf).unwrap();
        assert_eq!(first.id, again.id);
    }

    #[test]
    fn test_read_only_branch_rejects_capture() {
        let (db, engine) = setup();
        queries::update_branch_status(&db.conn(), "b1", BranchStatus::Archived).unwrap();
        let err = engine.capture_snapshot("b1", payload("open")).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_config_must_be_object() {
        let (_db, engine) = setup();
        let content = SnapshotContent::with_config(json!([1, 2]));
        let err = engine.capture_snapshot("b1", content).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_unknown_ids() {
        let (_db, engine) = setup();
        assert!(matches!(
            engine.capture_snapshot("nope", payload("x")),
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(engine.get_snapshot("nope"), Err(CoreError::NotFound { .. })));
        assert!(matches!(engine.get_head_snapshot("b1"), Err(CoreError::NotFound { .. })));
    }
}
