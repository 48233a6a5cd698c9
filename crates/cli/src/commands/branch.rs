//! `suitebranch branch ...`

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::Cell;

use suitebranch_core::models::{Branch, BranchStatus, BranchUpdate};

use super::{format_time, table};
use crate::{style, App};

#[derive(Subcommand, Debug)]
pub enum BranchAction {
    /// Fork a new branch (from the suite's default branch unless --parent is given).
    Create {
        #[arg(long)]
        suite: String,
        #[arg(long)]
        name: String,
        /// Parent branch id.
        #[arg(long)]
        parent: Option<String>,
    },

    /// List the branches of a suite.
    List {
        #[arg(long)]
        suite: String,
    },

    /// Show one branch and its ancestry.
    Show { id: String },

    /// Rename a branch or change its status.
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        /// active, merged, closed or archived.
        #[arg(long)]
        status: Option<BranchStatus>,
    },

    /// Delete a branch and its snapshots.
    Delete { id: String },

    /// Show (creating if needed) the suite's default branch.
    Default {
        #[arg(long)]
        suite: String,
    },
}

pub fn run(app: &App, action: BranchAction) -> Result<()> {
    match action {
        BranchAction::Create {
            suite,
            name,
            parent,
        } => {
            let branch = app
                .branches
                .create_branch(&suite, &name, parent.as_deref(), &app.actor)
                .context("failed to create branch")?;
            if !app.print_json(&branch)? {
                println!(
                    "{}",
                    style::success(&format!("Created branch '{}' ({})", branch.name, branch.id))
                );
            }
        }
        BranchAction::List { suite } => {
            let branches = app.branches.list_branches(&suite)?;
            if app.print_json(&branches)? {
                return Ok(());
            }
            if branches.is_empty() {
                println!("{}", style::dim(&format!("No branches for suite {suite}.")));
                return Ok(());
            }
            print_branch_table(&branches);
        }
        BranchAction::Show { id } => {
            let branch = app.branches.get_branch(&id)?;
            let ancestors = app.branches.ancestors(&id)?;
            if app.print_json(&serde_json::json!({
                "branch": branch,
                "ancestors": ancestors,
            }))? {
                return Ok(());
            }
            print_branch(&branch);
            if !ancestors.is_empty() {
                let chain: Vec<&str> = ancestors.iter().map(|b| b.name.as_str()).collect();
                println!("  Ancestors  : {}", chain.join(" <- "));
            }
        }
        BranchAction::Update { id, name, status } => {
            let branch = app
                .branches
                .update_branch(&id, BranchUpdate { name, status })
                .context("failed to update branch")?;
            if !app.print_json(&branch)? {
                println!("{}", style::success(&format!("Updated branch {}", branch.id)));
                print_branch(&branch);
            }
        }
        BranchAction::Delete { id } => {
            app.branches
                .delete_branch(&id)
                .context("failed to delete branch")?;
            if !app.print_json(&serde_json::json!({ "deleted": id }))? {
                println!("{}", style::success(&format!("Deleted branch {id}")));
            }
        }
        BranchAction::Default { suite } => {
            let branch = app.branches.ensure_default_branch(&suite)?;
            if !app.print_json(&branch)? {
                print_branch(&branch);
            }
        }
    }
    Ok(())
}

fn print_branch(branch: &Branch) {
    println!("{}", style::header(&format!("Branch {}", branch.name)));
    println!("  Id         : {}", branch.id);
    println!("  Suite      : {}", branch.suite_id);
    println!("  Status     : {}", style::branch_status(branch.status));
    println!("  Default    : {}", if branch.is_default { "yes" } else { "no" });
    println!(
        "  Parent     : {}",
        branch.parent_branch_id.as_deref().unwrap_or("-")
    );
    println!(
        "  Forked at  : {}",
        branch.forked_from_snapshot_id.as_deref().unwrap_or("-")
    );
    println!(
        "  Head       : {}",
        branch.head_snapshot_id.as_deref().unwrap_or("-")
    );
    println!("  Created    : {}", format_time(&branch.created_at));
}

fn print_branch_table(branches: &[Branch]) {
    let mut table = table(&["ID", "Name", "Status", "Parent", "Head", "Created"]);
    for b in branches {
        let name = if b.is_default {
            format!("{} *", b.name)
        } else {
            b.name.clone()
        };
        table.add_row(vec![
            Cell::new(style::short_id(&b.id)),
            Cell::new(name),
            Cell::new(style::branch_status(b.status)),
            Cell::new(b.parent_branch_id.as_deref().map(style::short_id).unwrap_or("-")),
            Cell::new(b.head_snapshot_id.as_deref().map(style::short_id).unwrap_or("-")),
            Cell::new(format_time(&b.created_at)),
        ]);
    }
    println!("{table}");
    println!("{}", style::dim("* default branch"));
}
