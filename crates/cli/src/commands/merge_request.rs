//! `suitebranch merge-request ...`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use comfy_table::Cell;
use serde_json::Value;

use suitebranch_core::models::{MergeConflict, MergeRequest, Resolution};

use super::{format_time, table};
use crate::{expand_tilde, style, App};

#[derive(Subcommand, Debug)]
pub enum MergeRequestAction {
    /// Propose merging one branch into another and detect conflicts.
    Create {
        #[arg(long)]
        source: String,
        #[arg(long)]
        target: String,
    },

    /// List merge requests, optionally only those touching one branch.
    List {
        #[arg(long)]
        branch: Option<String>,
    },

    /// Show a merge request with its conflicts.
    Show { id: String },

    /// List the conflicts of a merge request.
    Conflicts { id: String },

    /// Settle one conflict.
    Resolve {
        /// Conflict id.
        conflict: String,

        #[arg(long, value_enum)]
        strategy: Strategy,

        /// JSON value for --strategy custom.
        #[arg(long, conflicts_with_all = ["remove", "file"])]
        value: Option<String>,

        /// File whose text becomes the value for --strategy custom.
        #[arg(long, conflicts_with = "remove")]
        file: Option<PathBuf>,

        /// Remove the file or key (--strategy custom).
        #[arg(long)]
        remove: bool,
    },

    /// Fold the source into the target once every conflict is resolved.
    Execute { id: String },

    /// Abandon a merge request.
    Close { id: String },

    /// Show the audit trail of a merge request.
    History { id: String },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    Source,
    Target,
    Both,
    Custom,
}

pub fn run(app: &App, action: MergeRequestAction) -> Result<()> {
    match action {
        MergeRequestAction::Create { source, target } => {
            let mr = app
                .merges
                .create_merge_request(&source, &target, &app.actor)
                .context("failed to create merge request")?;
            let conflicts = app.merges.list_conflicts(&mr.id)?;
            if app.print_json(&serde_json::json!({
                "merge_request": mr,
                "conflicts": conflicts,
            }))? {
                return Ok(());
            }
            if conflicts.is_empty() {
                println!(
                    "{}",
                    style::success(&format!("Merge request {} is ready to merge", mr.id))
                );
            } else {
                println!(
                    "{}",
                    style::warn(&format!(
                        "Merge request {} has {} conflict(s)",
                        mr.id,
                        conflicts.len()
                    ))
                );
                print_conflict_table(&conflicts);
            }
        }
        MergeRequestAction::List { branch } => {
            let requests = app.merges.list_merge_requests(branch.as_deref())?;
            if app.print_json(&requests)? {
                return Ok(());
            }
            if requests.is_empty() {
                println!("{}", style::dim("No merge requests."));
                return Ok(());
            }
            let mut table = table(&["ID", "Source", "Target", "Status", "By", "Created"]);
            for mr in &requests {
                table.add_row(vec![
                    Cell::new(style::short_id(&mr.id)),
                    Cell::new(style::short_id(&mr.source_branch_id)),
                    Cell::new(style::short_id(&mr.target_branch_id)),
                    Cell::new(style::request_status(mr.status)),
                    Cell::new(&mr.created_by),
                    Cell::new(format_time(&mr.created_at)),
                ]);
            }
            println!("{table}");
        }
        MergeRequestAction::Show { id } => {
            let mr = app.merges.get_merge_request(&id)?;
            let conflicts = app.merges.list_conflicts(&id)?;
            if app.print_json(&serde_json::json!({
                "merge_request": mr,
                "conflicts": conflicts,
            }))? {
                return Ok(());
            }
            print_request(&mr);
            if !conflicts.is_empty() {
                println!();
                print_conflict_table(&conflicts);
            }
        }
        MergeRequestAction::Conflicts { id } => {
            let conflicts = app.merges.list_conflicts(&id)?;
            if app.print_json(&conflicts)? {
                return Ok(());
            }
            if conflicts.is_empty() {
                println!("{}", style::success("No conflicts."));
                return Ok(());
            }
            print_conflict_table(&conflicts);
        }
        MergeRequestAction::Resolve {
            conflict,
            strategy,
            value,
            file,
            remove,
        } => {
            let resolution = build_resolution(strategy, value.as_deref(), file, remove)?;
            let record = app
                .merges
                .resolve_conflict(&conflict, resolution, &app.actor)
                .context("failed to resolve conflict")?;
            if !app.print_json(&record)? {
                println!(
                    "{}",
                    style::success(&format!(
                        "Resolved conflict {} with {}",
                        record.conflict_id, record.strategy
                    ))
                );
            }
        }
        MergeRequestAction::Execute { id } => {
            let snapshot = app
                .merges
                .execute_merge(&id, &app.actor)
                .context("failed to execute merge")?;
            if !app.print_json(&serde_json::json!({
                "merge_request_id": id,
                "merged_snapshot_id": snapshot.id,
                "target_branch_id": snapshot.branch_id,
            }))? {
                println!(
                    "{}",
                    style::success(&format!(
                        "Merged {}; new target head {}",
                        id, snapshot.id
                    ))
                );
            }
        }
        MergeRequestAction::Close { id } => {
            let mr = app
                .merges
                .close_merge_request(&id, &app.actor)
                .context("failed to close merge request")?;
            if !app.print_json(&mr)? {
                println!("{}", style::success(&format!("Closed merge request {}", mr.id)));
            }
        }
        MergeRequestAction::History { id } => {
            let entries = app.merges.history(&id)?;
            if app.print_json(&entries)? {
                return Ok(());
            }
            let mut table = table(&["Time", "Action", "Actor", "Detail"]);
            for entry in &entries {
                table.add_row(vec![
                    Cell::new(format_time(&entry.timestamp)),
                    Cell::new(entry.action),
                    Cell::new(&entry.actor),
                    Cell::new(entry.detail.as_deref().unwrap_or("")),
                ]);
            }
            println!("{table}");
        }
    }
    Ok(())
}

fn build_resolution(
    strategy: Strategy,
    value: Option<&str>,
    file: Option<PathBuf>,
    remove: bool,
) -> Result<Resolution> {
    if strategy != Strategy::Custom && (value.is_some() || file.is_some() || remove) {
        anyhow::bail!("--value, --file and --remove only apply to --strategy custom");
    }
    Ok(match strategy {
        Strategy::Source => Resolution::Source,
        Strategy::Target => Resolution::Target,
        Strategy::Both => Resolution::Both,
        Strategy::Custom => {
            let custom = match (value, file) {
                _ if remove => None,
                (Some(raw), _) => Some(
                    serde_json::from_str::<Value>(raw)
                        .with_context(|| format!("--value is not valid JSON: {raw}"))?,
                ),
                (None, Some(path)) => {
                    let path = expand_tilde(&path);
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    Some(Value::String(text))
                }
                (None, None) => {
                    anyhow::bail!("--strategy custom needs --value, --file or --remove")
                }
            };
            Resolution::Custom(custom)
        }
    })
}

fn print_request(mr: &MergeRequest) {
    println!("{}", style::header(&format!("Merge request {}", mr.id)));
    println!("  Status     : {}", style::request_status(mr.status));
    println!("  Source     : {}", mr.source_branch_id);
    println!("  Target     : {}", mr.target_branch_id);
    println!("  Base       : {}", mr.base_snapshot_id);
    println!("  Created by : {}", mr.created_by);
    println!("  Created    : {}", format_time(&mr.created_at));
    if let Some(merged_at) = &mr.merged_at {
        println!("  Merged     : {}", format_time(merged_at));
    }
    if let Some(snapshot) = &mr.merged_snapshot_id {
        println!("  Result     : {}", snapshot);
    }
}

fn print_conflict_table(conflicts: &[MergeConflict]) {
    let mut table = table(&["ID", "Kind", "Path", "Source", "Target", "Status"]);
    for c in conflicts {
        table.add_row(vec![
            Cell::new(&c.id),
            Cell::new(c.kind),
            Cell::new(&c.path),
            Cell::new(preview(c.source_value.as_ref())),
            Cell::new(preview(c.target_value.as_ref())),
            Cell::new(style::resolution_status(c.resolution_status)),
        ]);
    }
    println!("{table}");
}

fn preview(value: Option<&Value>) -> String {
    match value {
        None => "<absent>".into(),
        Some(Value::String(text)) => style::truncate(text.lines().next().unwrap_or(""), 40),
        Some(other) => style::truncate(&other.to_string(), 40),
    }
}
