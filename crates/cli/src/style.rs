//! Shared styling utilities for terminal output.

use console::Style;

use suitebranch_core::models::{BranchStatus, ChangeType, MergeRequestStatus, ResolutionStatus};

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold, white).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

pub fn branch_status(status: BranchStatus) -> String {
    let style = match status {
        BranchStatus::Active => Style::new().green(),
        BranchStatus::Merged => Style::new().magenta(),
        BranchStatus::Closed | BranchStatus::Archived => Style::new().dim(),
    };
    style.apply_to(status.as_str()).to_string()
}

pub fn request_status(status: MergeRequestStatus) -> String {
    let style = match status {
        MergeRequestStatus::Open => Style::new().green(),
        MergeRequestStatus::Conflict => Style::new().red().bold(),
        MergeRequestStatus::Merged => Style::new().magenta(),
        MergeRequestStatus::Closed => Style::new().dim(),
    };
    style.apply_to(status.as_str()).to_string()
}

pub fn resolution_status(status: ResolutionStatus) -> String {
    let style = match status {
        ResolutionStatus::Pending => Style::new().yellow(),
        ResolutionStatus::Resolved => Style::new().green(),
    };
    style.apply_to(status.as_str()).to_string()
}

/// `+`, `-` or `~` marker for a change, coloured like a unified diff.
pub fn change_marker(change: ChangeType) -> String {
    match change {
        ChangeType::Added => Style::new().green().apply_to("+").to_string(),
        ChangeType::Removed => Style::new().red().apply_to("-").to_string(),
        ChangeType::Modified => Style::new().yellow().apply_to("~").to_string(),
    }
}

/// First eight characters of an id, enough to tell rows apart.
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Truncate a string to at most `max_len` characters, appending "..." if
/// truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_handles_short_input() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 8), "hello...");
        assert_eq!(truncate("ééééé", 4), "é...");
    }
}
