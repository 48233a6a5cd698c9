//! `suitebranch diff <from> <to>`
//!
//! The diff runs on the blocking pool; `--timeout-secs` cancels it through
//! the engine's cancellation token.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use suitebranch_core::models::{ChangeType, CodeChange, ConfigChange, Diff, LineOp};
use suitebranch_core::CoreError;

use crate::{style, App};

pub async fn run(
    app: &App,
    from: &str,
    to: &str,
    patch: bool,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let diff = compute(app, from, to, timeout_secs).await?;

    let patches: Vec<(String, String)> = if patch {
        let from_snap = app.snapshots.get_snapshot(from)?;
        let to_snap = app.snapshots.get_snapshot(to)?;
        diff.code_changes
            .iter()
            .map(|change| {
                let old = from_snap.content.code_files.get(&change.path);
                let new = to_snap.content.code_files.get(&change.path);
                (
                    change.path.clone(),
                    unified_patch(
                        old.map(String::as_str).unwrap_or(""),
                        new.map(String::as_str).unwrap_or(""),
                    ),
                )
            })
            .collect()
    } else {
        Vec::new()
    };

    if app.json {
        let mut value = serde_json::to_value(&diff).context("failed to encode diff")?;
        if patch {
            value["patches"] = serde_json::Value::Object(
                patches
                    .into_iter()
                    .map(|(path, text)| (path, serde_json::Value::String(text)))
                    .collect(),
            );
        }
        app.print_json(&value)?;
        return Ok(());
    }

    print_diff(&diff, &patches);
    Ok(())
}

async fn compute(app: &App, from: &str, to: &str, timeout_secs: Option<u64>) -> Result<Diff> {
    let cancel = CancellationToken::new();
    let engine = app.diffs.clone();
    let (from_id, to_id, token) = (from.to_string(), to.to_string(), cancel.clone());
    let mut task = tokio::task::spawn_blocking(move || {
        engine.diff_cancellable(&from_id, &to_id, &token)
    });

    let mut timed_out = false;
    let joined = match timeout_secs {
        Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(from, to, secs, "diff timed out, cancelling");
                timed_out = true;
                cancel.cancel();
                task.await
            }
        },
        None => task.await,
    };

    match joined.context("diff task failed")? {
        Ok(diff) => Ok(diff),
        Err(CoreError::Cancelled) if timed_out => Err(anyhow::Error::new(CoreError::Cancelled))
            .with_context(|| {
                format!(
                    "diff {from} -> {to} timed out after {}s",
                    timeout_secs.unwrap_or_default()
                )
            }),
        Err(e) => Err(anyhow::Error::new(e)).with_context(|| format!("failed to diff {from} -> {to}")),
    }
}

fn unified_patch(old: &str, new: &str) -> String {
    diffy::create_patch(old, new).to_string()
}

fn print_diff(diff: &Diff, patches: &[(String, String)]) {
    println!(
        "{}",
        style::header(&format!(
            "Diff {} -> {}",
            style::short_id(&diff.from_snapshot_id),
            style::short_id(&diff.to_snapshot_id)
        ))
    );
    if diff.is_empty() {
        println!("{}", style::dim("No changes."));
        return;
    }

    if !diff.code_changes.is_empty() {
        println!();
        println!("Code files ({}):", diff.code_changes.len());
        for change in &diff.code_changes {
            print_code_change(change);
        }
    }
    print_structural("Config", &diff.config_changes);
    print_structural("Scenarios", &diff.scenario_changes);

    for (path, text) in patches {
        println!();
        println!("{}", style::header(path));
        print!("{text}");
    }

    println!();
    println!(
        "{}",
        style::dim(&format!("{} change(s)", diff.change_count()))
    );
}

fn print_code_change(change: &CodeChange) {
    let (added, removed) = change.line_ops.iter().fold((0, 0), |(a, r), op| match op {
        LineOp::Insert { lines } => (a + lines.len(), r),
        LineOp::Delete { lines } => (a, r + lines.len()),
        LineOp::Equal { .. } => (a, r),
    });
    println!(
        "  {} {} {}",
        style::change_marker(change.change_type),
        change.path,
        style::dim(&format!("(+{added} -{removed})"))
    );
}

fn print_structural(label: &str, changes: &[ConfigChange]) {
    if changes.is_empty() {
        return;
    }
    println!();
    println!("{label} ({}):", changes.len());
    for change in changes {
        let detail = match change.change_type {
            ChangeType::Added => render(change.new_value.as_ref()),
            ChangeType::Removed => render(change.old_value.as_ref()),
            ChangeType::Modified => format!(
                "{} -> {}",
                render(change.old_value.as_ref()),
                render(change.new_value.as_ref())
            ),
        };
        println!(
            "  {} {} {}",
            style::change_marker(change.change_type),
            change.key_path,
            style::truncate(&detail, 80)
        );
    }
}

fn render(value: Option<&serde_json::Value>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "<absent>".into())
}
