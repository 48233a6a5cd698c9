//! Merge request lifecycle.
//!
//! ```text
//! open ──(conflicts found)──> conflict ──(all resolved)──> open ──> merged
//!   └──────────────┴──────────────> closed
//! ```
//!
//! Every write happens inside one transaction, so a request never shows
//! partial state and concurrent merges into the same target are serialized
//! by the store. Diffs are computed before that transaction against the
//! heads read beforehand; the transaction rejects the write with
//! `StaleBranch` if either head has moved since.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::branch::load_in;
use crate::config::DiffConfig;
use crate::db::{queries, Database};
use crate::diff::diff_contents;
use crate::errors::{CoreError, CoreResult};
use crate::models::{
    Branch, ConflictResolution, HistoryAction, MergeConflict, MergeHistoryEntry, MergeRequest,
    MergeRequestStatus, Resolution, ResolutionStatus, Snapshot,
};
use crate::snapshot::{capture_in, head_in};

use super::apply::{build_merged_content, Settled};
use super::base::resolve_base;
use super::conflicts::detect_conflicts;
use super::resolve::resolved_value;

/// Drives merge requests from proposal to merge or close.
pub struct MergeCoordinator {
    db: Arc<Database>,
    max_lcs_cells: usize,
}

impl MergeCoordinator {
    pub fn new(db: Arc<Database>, config: &DiffConfig) -> Self {
        Self {
            db,
            max_lcs_cells: config.max_lcs_cells,
        }
    }

    /// Propose merging `source_branch_id` into `target_branch_id`, recording
    /// every conflict between the two lines since their merge base.
    pub fn create_merge_request(
        &self,
        source_branch_id: &str,
        target_branch_id: &str,
        actor: &str,
    ) -> CoreResult<MergeRequest> {
        self.create_merge_request_cancellable(
            source_branch_id,
            target_branch_id,
            actor,
            &CancellationToken::new(),
        )
    }

    /// [`create_merge_request`](Self::create_merge_request) with diffs that
    /// observe `cancel`.
    ///
    /// The diffs run without holding the store. The request is written only
    /// if both heads are still the ones that were diffed, otherwise
    /// `StaleBranch` is returned.
    pub fn create_merge_request_cancellable(
        &self,
        source_branch_id: &str,
        target_branch_id: &str,
        actor: &str,
        cancel: &CancellationToken,
    ) -> CoreResult<MergeRequest> {
        let _span = info_span!("create_merge_request", source = source_branch_id, target = target_branch_id)
            .entered();

        let plan = self
            .db
            .read(|conn| plan_in(conn, source_branch_id, target_branch_id))?;
        let MergePlan {
            source,
            target,
            base,
            source_head,
            target_head,
        } = plan;

        let source_diff = diff_contents(
            &base.id,
            &source_head.id,
            &base.content,
            &source_head.content,
            self.max_lcs_cells,
            cancel,
        )?;
        let target_diff = diff_contents(
            &base.id,
            &target_head.id,
            &base.content,
            &target_head.content,
            self.max_lcs_cells,
            cancel,
        )?;
        let detected = detect_conflicts(
            &base.content,
            &source_head.content,
            &target_head.content,
            &source_diff,
            &target_diff,
        );

        self.db.transaction(|conn| {
            let current = plan_in(conn, &source.id, &target.id)?;
            for (branch, diffed, now) in [
                (&source, &source_head, &current.source_head),
                (&target, &target_head, &current.target_head),
            ] {
                if now.id != diffed.id {
                    warn!(branch_id = %branch.id, expected = %diffed.id, actual = %now.id, "branch moved while diffing");
                    return Err(CoreError::StaleBranch {
                        branch_id: branch.id.clone(),
                        expected: diffed.id.clone(),
                        actual: Some(now.id.clone()),
                    });
                }
            }

            let now = Utc::now();
            let mr = MergeRequest {
                id: Uuid::new_v4().to_string(),
                source_branch_id: source.id.clone(),
                target_branch_id: target.id.clone(),
                base_snapshot_id: base.id.clone(),
                source_head_snapshot_id: source_head.id.clone(),
                target_head_snapshot_id: target_head.id.clone(),
                status: if detected.is_empty() {
                    MergeRequestStatus::Open
                } else {
                    MergeRequestStatus::Conflict
                },
                created_by: actor.to_string(),
                created_at: now,
                merged_at: None,
                merged_snapshot_id: None,
            };
            queries::insert_merge_request(conn, &mr)?;
            queries::append_history(
                conn,
                &mr.id,
                HistoryAction::Created,
                actor,
                Some(format!("{} -> {}", source.name, target.name).as_str()),
            )?;

            if !detected.is_empty() {
                let paths: Vec<&str> = detected.iter().map(|c| c.path.as_str()).collect();
                for (ordinal, found) in detected.iter().enumerate() {
                    let conflict = MergeConflict {
                        id: Uuid::new_v4().to_string(),
                        merge_request_id: mr.id.clone(),
                        path: found.path.clone(),
                        key_path: found.key_path.clone(),
                        kind: found.kind,
                        base_value: found.base_value.clone(),
                        source_value: found.source_value.clone(),
                        target_value: found.target_value.clone(),
                        resolution_status: ResolutionStatus::Pending,
                        created_at: now,
                    };
                    queries::insert_conflict(conn, &conflict, ordinal)?;
                }
                queries::append_history(
                    conn,
                    &mr.id,
                    HistoryAction::ConflictDetected,
                    actor,
                    Some(paths.join(", ").as_str()),
                )?;
                warn!(merge_request_id = %mr.id, conflicts = detected.len(), "merge request has conflicts");
            }

            info!(
                merge_request_id = %mr.id,
                base = %base.id,
                source_changes = source_diff.change_count(),
                target_changes = target_diff.change_count(),
                status = %mr.status,
                actor,
                "created merge request"
            );
            Ok(mr)
        })
    }

    /// Settle one conflict. The request returns to `open` once none remain.
    pub fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution: Resolution,
        actor: &str,
    ) -> CoreResult<ConflictResolution> {
        self.db.transaction(|conn| {
            let conflict = queries::get_conflict(conn, conflict_id)?
                .ok_or_else(|| CoreError::not_found("conflict", conflict_id))?;
            let mr = load_request(conn, &conflict.merge_request_id)?;

            ensure_not_terminal(&mr)?;
            if conflict.resolution_status == ResolutionStatus::Resolved {
                return Err(CoreError::validation(format!(
                    "conflict {conflict_id} is already resolved"
                )));
            }

            let value = resolved_value(&conflict, &resolution, self.max_lcs_cells)?;
            let record = ConflictResolution {
                id: Uuid::new_v4().to_string(),
                conflict_id: conflict.id.clone(),
                strategy: resolution.strategy(),
                resolved_value: value,
                resolved_by: actor.to_string(),
                resolved_at: Utc::now(),
            };
            queries::insert_resolution(conn, &record)?;
            queries::mark_conflict_resolved(conn, &conflict.id)?;
            queries::append_history(
                conn,
                &mr.id,
                HistoryAction::Resolved,
                actor,
                Some(format!("{} ({})", conflict.path, record.strategy).as_str()),
            )?;

            let remaining = queries::pending_conflict_ids(conn, &mr.id)?;
            if remaining.is_empty() && mr.status == MergeRequestStatus::Conflict {
                queries::update_merge_request_status(conn, &mr.id, MergeRequestStatus::Open)?;
            }

            info!(
                merge_request_id = %mr.id,
                conflict_id,
                strategy = %record.strategy,
                remaining = remaining.len(),
                actor,
                "resolved conflict"
            );
            Ok(record)
        })
    }

    /// Fold the source into the target and return the new target head.
    pub fn execute_merge(&self, merge_request_id: &str, actor: &str) -> CoreResult<Snapshot> {
        self.execute_merge_cancellable(merge_request_id, actor, &CancellationToken::new())
    }

    /// [`execute_merge`](Self::execute_merge) with a source diff that
    /// observes `cancel`. The diff runs without holding the store; every
    /// precondition is checked again inside the write transaction.
    pub fn execute_merge_cancellable(
        &self,
        merge_request_id: &str,
        actor: &str,
        cancel: &CancellationToken,
    ) -> CoreResult<Snapshot> {
        let _span = info_span!("execute_merge", merge_request_id).entered();

        let (base, source_head) = self.db.read(|conn| -> CoreResult<(Snapshot, Snapshot)> {
            let mr = load_request(conn, merge_request_id)?;
            ensure_not_terminal(&mr)?;
            Ok((
                load_snapshot(conn, &mr.base_snapshot_id)?,
                load_snapshot(conn, &mr.source_head_snapshot_id)?,
            ))
        })?;
        let source_diff = diff_contents(
            &base.id,
            &source_head.id,
            &base.content,
            &source_head.content,
            self.max_lcs_cells,
            cancel,
        )?;

        self.db.transaction(|conn| {
            let mr = load_request(conn, merge_request_id)?;
            ensure_not_terminal(&mr)?;

            let unresolved = queries::pending_conflict_ids(conn, &mr.id)?;
            if !unresolved.is_empty() {
                return Err(CoreError::Conflict {
                    merge_request_id: mr.id.clone(),
                    unresolved,
                });
            }

            let target = load_in(conn, &mr.target_branch_id)?;
            let target_head = head_in(conn, &target.id)?;
            if target_head.id != mr.target_head_snapshot_id {
                warn!(
                    merge_request_id = %mr.id,
                    expected = %mr.target_head_snapshot_id,
                    actual = %target_head.id,
                    "target branch moved since the merge request was created"
                );
                return Err(CoreError::StaleBranch {
                    branch_id: target.id.clone(),
                    expected: mr.target_head_snapshot_id.clone(),
                    actual: Some(target_head.id),
                });
            }

            let conflicts = queries::list_conflicts(conn, &mr.id)?;
            let resolutions = queries::list_resolutions(conn, &mr.id)?;
            let mut settled = Vec::with_capacity(conflicts.len());
            for conflict in &conflicts {
                let resolution = resolutions
                    .iter()
                    .find(|r| r.conflict_id == conflict.id)
                    .ok_or_else(|| CoreError::not_found("resolution", &conflict.id))?;
                settled.push(Settled {
                    conflict,
                    value: resolution.resolved_value.clone(),
                });
            }

            let merged = build_merged_content(
                &target_head.content,
                &source_head.content,
                &source_diff,
                &settled,
            )?;
            let snapshot = capture_in(conn, &target, merged)?;

            let merged_at = Utc::now();
            queries::mark_merge_request_merged(conn, &mr.id, &merged_at, &snapshot.id)?;
            queries::append_history(
                conn,
                &mr.id,
                HistoryAction::Merged,
                actor,
                Some(format!("snapshot {}", snapshot.id).as_str()),
            )?;

            info!(
                merge_request_id = %mr.id,
                target = %target.name,
                snapshot_id = %snapshot.id,
                resolved = settled.len(),
                actor,
                "merge executed"
            );
            Ok(snapshot)
        })
    }

    /// Abandon a merge request.
    pub fn close_merge_request(&self, merge_request_id: &str, actor: &str) -> CoreResult<MergeRequest> {
        self.db.transaction(|conn| {
            let mut mr = load_request(conn, merge_request_id)?;
            ensure_not_terminal(&mr)?;
            queries::update_merge_request_status(conn, &mr.id, MergeRequestStatus::Closed)?;
            queries::append_history(conn, &mr.id, HistoryAction::Closed, actor, None)?;
            info!(merge_request_id = %mr.id, actor, "closed merge request");
            mr.status = MergeRequestStatus::Closed;
            Ok(mr)
        })
    }

    pub fn get_merge_request(&self, id: &str) -> CoreResult<MergeRequest> {
        self.db.read(|conn| load_request(conn, id))
    }

    /// All merge requests, or only those with `branch_id` as source or target.
    pub fn list_merge_requests(&self, branch_id: Option<&str>) -> CoreResult<Vec<MergeRequest>> {
        self.db
            .read(|conn| Ok(queries::list_merge_requests(conn, branch_id)?))
    }

    pub fn list_conflicts(&self, merge_request_id: &str) -> CoreResult<Vec<MergeConflict>> {
        self.db.read(|conn| {
            load_request(conn, merge_request_id)?;
            Ok(queries::list_conflicts(conn, merge_request_id)?)
        })
    }

    pub fn get_resolution(&self, conflict_id: &str) -> CoreResult<Option<ConflictResolution>> {
        self.db.read(|conn| {
            if queries::get_conflict(conn, conflict_id)?.is_none() {
                return Err(CoreError::not_found("conflict", conflict_id));
            }
            Ok(queries::get_resolution_for_conflict(conn, conflict_id)?)
        })
    }

    /// Audit trail of a merge request, oldest first.
    pub fn history(&self, merge_request_id: &str) -> CoreResult<Vec<MergeHistoryEntry>> {
        self.db.read(|conn| {
            load_request(conn, merge_request_id)?;
            Ok(queries::list_history(conn, merge_request_id)?)
        })
    }
}

fn load_request(conn: &Connection, id: &str) -> CoreResult<MergeRequest> {
    queries::get_merge_request(conn, id)?.ok_or_else(|| CoreError::not_found("merge request", id))
}

fn ensure_not_terminal(mr: &MergeRequest) -> CoreResult<()> {
    if mr.status.is_terminal() {
        return Err(CoreError::validation(format!(
            "merge request {} is already {}",
            mr.id, mr.status
        )));
    }
    Ok(())
}

/// Both branches, their heads and the merge base, after validating the
/// direction of the merge.
struct MergePlan {
    source: Branch,
    target: Branch,
    base: Snapshot,
    source_head: Snapshot,
    target_head: Snapshot,
}

fn plan_in(conn: &Connection, source_id: &str, target_id: &str) -> CoreResult<MergePlan> {
    let source = load_in(conn, source_id)?;
    let target = load_in(conn, target_id)?;

    if source.id == target.id {
        return Err(CoreError::validation("cannot merge a branch into itself"));
    }
    if source.suite_id != target.suite_id {
        return Err(CoreError::validation(format!(
            "branches '{}' and '{}' belong to different suites",
            source.name, target.name
        )));
    }
    if target.status.is_read_only() {
        return Err(CoreError::validation(format!(
            "target branch '{}' is {}",
            target.name, target.status
        )));
    }

    let base = resolve_base(conn, &source, &target)?;
    let source_head = head_in(conn, &source.id)?;
    let target_head = head_in(conn, &target.id)?;
    Ok(MergePlan {
        source,
        target,
        base,
        source_head,
        target_head,
    })
}

fn load_snapshot(conn: &Connection, id: &str) -> CoreResult<Snapshot> {
    queries::get_snapshot(conn, id)?.ok_or_else(|| CoreError::not_found("snapshot", id))
}
