//! `suitebranch snapshot ...`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::Cell;

use suitebranch_core::models::{Snapshot, SnapshotContent};

use super::{format_time, table};
use crate::{expand_tilde, style, App};

#[derive(Subcommand, Debug)]
pub enum SnapshotAction {
    /// Capture the contents of a JSON file onto a branch.
    ///
    /// The file holds `code_files` (path -> text), `scenarios` (array) and
    /// `config` (object); missing sections default to empty.
    Capture {
        #[arg(long)]
        branch: String,
        #[arg(long)]
        file: PathBuf,
    },

    /// Show a snapshot's metadata, optionally with its full content.
    Show {
        id: String,
        #[arg(long)]
        content: bool,
    },

    /// List a branch's snapshots, newest last.
    List {
        #[arg(long)]
        branch: String,
    },
}

pub fn run(app: &App, action: SnapshotAction) -> Result<()> {
    match action {
        SnapshotAction::Capture { branch, file } => {
            let content = read_content(&expand_tilde(&file))?;
            let snapshot = app
                .snapshots
                .capture_snapshot(&branch, content)
                .context("failed to capture snapshot")?;
            if !app.print_json(&summary(&snapshot))? {
                println!(
                    "{}",
                    style::success(&format!(
                        "Branch head is snapshot {} (#{})",
                        snapshot.id, snapshot.seq
                    ))
                );
            }
        }
        SnapshotAction::Show { id, content } => {
            let snapshot = app.snapshots.get_snapshot(&id)?;
            if app.json {
                if content {
                    app.print_json(&snapshot)?;
                } else {
                    app.print_json(&summary(&snapshot))?;
                }
                return Ok(());
            }
            println!("{}", style::header(&format!("Snapshot {}", snapshot.id)));
            println!("  Branch     : {}", snapshot.branch_id);
            println!("  Sequence   : {}", snapshot.seq);
            println!("  Captured   : {}", format_time(&snapshot.captured_at));
            println!("  Hash       : {}", snapshot.content_hash);
            println!("  Code files : {}", snapshot.content.code_files.len());
            println!("  Scenarios  : {}", snapshot.content.scenarios.len());
            if content {
                println!();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&snapshot.content)
                        .context("failed to encode snapshot content")?
                );
            }
        }
        SnapshotAction::List { branch } => {
            let snapshots = app.snapshots.list_snapshots(&branch)?;
            if app.print_json(&snapshots.iter().map(summary).collect::<Vec<_>>())? {
                return Ok(());
            }
            if snapshots.is_empty() {
                println!("{}", style::dim("No snapshots."));
                return Ok(());
            }
            let mut table = table(&["#", "ID", "Captured", "Files", "Scenarios", "Hash"]);
            for s in &snapshots {
                table.add_row(vec![
                    Cell::new(s.seq),
                    Cell::new(&s.id),
                    Cell::new(format_time(&s.captured_at)),
                    Cell::new(s.content.code_files.len()),
                    Cell::new(s.content.scenarios.len()),
                    Cell::new(style::short_id(&s.content_hash)),
                ]);
            }
            println!("{table}");
        }
    }
    Ok(())
}

fn read_content(path: &Path) -> Result<SnapshotContent> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid snapshot content", path.display()))
}

/// Snapshot metadata without the payload.
fn summary(s: &Snapshot) -> serde_json::Value {
    serde_json::json!({
        "id": s.id,
        "branch_id": s.branch_id,
        "seq": s.seq,
        "captured_at": s.captured_at,
        "content_hash": s.content_hash,
        "code_files": s.content.code_files.len(),
        "scenarios": s.content.scenarios.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_content_defaults_missing_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"code_files": {{"login.spec": "a\n"}}}}"#).unwrap();
        let content = read_content(file.path()).unwrap();
        assert_eq!(content.code_files.len(), 1);
        assert!(content.scenarios.is_empty());
        assert_eq!(content.config, serde_json::json!({}));
    }

    #[test]
    fn test_read_content_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(read_content(file.path()).is_err());
    }
}
