//! Branch tree management.
//!
//! Every suite has exactly one default branch, created on demand with an
//! initial snapshot. Other branches fork from a parent by copying the
//! parent's head into a fresh snapshot and remembering the parent snapshot
//! as the fork point. Parents are fixed at creation, so the tree never
//! contains cycles.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::BranchingConfig;
use crate::db::{queries, Database};
use crate::errors::{CoreError, CoreResult, DatabaseError};
use crate::models::{Branch, BranchStatus, BranchUpdate, Snapshot, SnapshotContent};
use crate::snapshot;

/// Creates, updates and removes branches.
pub struct BranchManager {
    db: Arc<Database>,
    config: BranchingConfig,
}

impl BranchManager {
    pub fn new(db: Arc<Database>, config: &BranchingConfig) -> Self {
        Self {
            db,
            config: config.clone(),
        }
    }

    /// Fork a new branch from `parent_branch_id`, or from the suite's
    /// default branch when no parent is given.
    pub fn create_branch(
        &self,
        suite_id: &str,
        name: &str,
        parent_branch_id: Option<&str>,
        actor: &str,
    ) -> CoreResult<Branch> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::validation("branch name must not be empty"));
        }

        self.db.transaction(|conn| {
            let parent = match parent_branch_id {
                Some(parent_id) => queries::get_branch(conn, parent_id)?.ok_or_else(|| {
                    CoreError::validation(format!("parent branch {parent_id} does not exist"))
                })?,
                None => ensure_default_in(conn, suite_id, &self.config)?,
            };
            if parent.suite_id != suite_id {
                return Err(CoreError::validation(format!(
                    "parent branch '{}' belongs to suite {}",
                    parent.name, parent.suite_id
                )));
            }
            if parent.status == BranchStatus::Archived {
                return Err(CoreError::validation(format!(
                    "parent branch '{}' is archived",
                    parent.name
                )));
            }
            ensure_name_free(conn, suite_id, name)?;

            let fork = snapshot::head_in(conn, &parent.id)?;
            let mut branch = Branch {
                id: Uuid::new_v4().to_string(),
                suite_id: suite_id.to_string(),
                name: name.to_string(),
                parent_branch_id: Some(parent.id.clone()),
                is_default: false,
                status: BranchStatus::Active,
                forked_from_snapshot_id: Some(fork.id.clone()),
                head_snapshot_id: None,
                created_at: Utc::now(),
            };
            queries::insert_branch(conn, &branch)?;
            let initial = snapshot::capture_in(conn, &branch, fork.content)?;
            branch.head_snapshot_id = Some(initial.id);

            info!(
                branch_id = %branch.id,
                suite_id,
                name,
                parent = %parent.name,
                forked_from = %fork.id,
                actor,
                "created branch"
            );
            Ok(branch)
        })
    }

    /// Return the suite's default branch, creating it if needed.
    pub fn ensure_default_branch(&self, suite_id: &str) -> CoreResult<Branch> {
        self.db
            .transaction(|conn| ensure_default_in(conn, suite_id, &self.config))
    }

    pub fn list_branches(&self, suite_id: &str) -> CoreResult<Vec<Branch>> {
        self.db
            .read(|conn| Ok(queries::list_branches(conn, suite_id)?))
    }

    pub fn get_branch(&self, id: &str) -> CoreResult<Branch> {
        self.db.read(|conn| load_in(conn, id))
    }

    pub fn get_head_snapshot(&self, branch_id: &str) -> CoreResult<Snapshot> {
        self.db.read(|conn| snapshot::head_in(conn, branch_id))
    }

    /// The branch followed by its parent, grandparent, ... up to the root.
    pub fn ancestors(&self, branch_id: &str) -> CoreResult<Vec<Branch>> {
        self.db.read(|conn| {
            let branch = load_in(conn, branch_id)?;
            lineage_in(conn, branch)
        })
    }

    /// Rename a branch and/or move it out of `active`.
    pub fn update_branch(&self, id: &str, update: BranchUpdate) -> CoreResult<Branch> {
        self.db.transaction(|conn| {
            let mut branch = load_in(conn, id)?;

            if let Some(name) = update.name.as_deref() {
                let name = name.trim();
                if name.is_empty() {
                    return Err(CoreError::validation("branch name must not be empty"));
                }
                if name != branch.name {
                    ensure_name_free(conn, &branch.suite_id, name)?;
                    queries::update_branch_name(conn, id, name)?;
                    info!(branch_id = id, from = %branch.name, to = name, "renamed branch");
                    branch.name = name.to_string();
                }
            }

            if let Some(status) = update.status {
                if status != branch.status {
                    if branch.status != BranchStatus::Active || status == BranchStatus::Active {
                        return Err(CoreError::validation(format!(
                            "cannot move branch '{}' from {} to {}",
                            branch.name, branch.status, status
                        )));
                    }
                    if branch.is_default {
                        return Err(CoreError::validation(format!(
                            "default branch '{}' must stay active",
                            branch.name
                        )));
                    }
                    queries::update_branch_status(conn, id, status)?;
                    info!(branch_id = id, from = %branch.status, to = %status, "branch status changed");
                    branch.status = status;
                }
            }

            Ok(branch)
        })
    }

    /// Delete a leaf branch and its snapshots.
    pub fn delete_branch(&self, id: &str) -> CoreResult<()> {
        self.db.transaction(|conn| {
            let branch = load_in(conn, id)?;
            if branch.is_default {
                return Err(CoreError::validation(format!(
                    "default branch '{}' cannot be deleted",
                    branch.name
                )));
            }
            let active = queries::count_active_merge_requests_for_branch(conn, id)?;
            if active > 0 {
                return Err(CoreError::validation(format!(
                    "branch '{}' is referenced by {active} open merge request(s)",
                    branch.name
                )));
            }
            let children = queries::list_child_branches(conn, id)?;
            if !children.is_empty() {
                return Err(CoreError::validation(format!(
                    "branch '{}' has {} child branch(es)",
                    branch.name,
                    children.len()
                )));
            }
            queries::delete_branch(conn, id)?;
            info!(branch_id = id, name = %branch.name, "deleted branch");
            Ok(())
        })
    }
}

pub(crate) fn load_in(conn: &Connection, id: &str) -> CoreResult<Branch> {
    queries::get_branch(conn, id)?.ok_or_else(|| CoreError::not_found("branch", id))
}

/// Walk parent pointers from `branch` to the root.
pub(crate) fn lineage_in(conn: &Connection, branch: Branch) -> CoreResult<Vec<Branch>> {
    let mut seen = HashSet::new();
    let mut lineage = Vec::new();
    let mut current = Some(branch);

    while let Some(branch) = current {
        if !seen.insert(branch.id.clone()) {
            return Err(DatabaseError::CorruptValue {
                column: "branches.parent_branch_id".into(),
                value: format!("cycle through {}", branch.id),
            }
            .into());
        }
        current = match branch.parent_branch_id.as_deref() {
            Some(parent_id) => Some(queries::get_branch(conn, parent_id)?.ok_or_else(|| {
                DatabaseError::CorruptValue {
                    column: "branches.parent_branch_id".into(),
                    value: parent_id.to_string(),
                }
            })?),
            None => None,
        };
        lineage.push(branch);
    }
    Ok(lineage)
}

fn ensure_name_free(conn: &Connection, suite_id: &str, name: &str) -> CoreResult<()> {
    if queries::find_branch_by_name(conn, suite_id, name)?.is_some() {
        return Err(CoreError::validation(format!(
            "branch '{name}' already exists in suite {suite_id}"
        )));
    }
    Ok(())
}

pub(crate) fn ensure_default_in(
    conn: &Connection,
    suite_id: &str,
    config: &BranchingConfig,
) -> CoreResult<Branch> {
    if let Some(existing) = queries::get_default_branch(conn, suite_id)? {
        debug!(suite_id, branch_id = %existing.id, "default branch exists");
        return Ok(existing);
    }
    if suite_id.trim().is_empty() {
        return Err(CoreError::validation("suite id must not be empty"));
    }
    ensure_name_free(conn, suite_id, &config.default_branch)?;

    let mut branch = Branch {
        id: Uuid::new_v4().to_string(),
        suite_id: suite_id.to_string(),
        name: config.default_branch.clone(),
        parent_branch_id: None,
        is_default: true,
        status: BranchStatus::Active,
        forked_from_snapshot_id: None,
        head_snapshot_id: None,
        created_at: Utc::now(),
    };
    queries::insert_branch(conn, &branch)?;
    let initial = snapshot::capture_in(
        conn,
        &branch,
        SnapshotContent::with_config(config.initial_config.clone()),
    )?;
    branch.head_snapshot_id = Some(initial.id);

    info!(suite_id, branch_id = %branch.id, name = %branch.name, "created default branch");
    Ok(branch)
}
