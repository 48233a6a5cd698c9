//! Three-way line merge for order-independent edits.
//!
//! Both sides are diffed against the base; the merge succeeds only when no
//! hunk of one side touches a hunk of the other. Touching includes adjacent
//! ranges and insertions at the same position, since either ordering of
//! those would be a guess.

use std::fmt;

use tokio_util::sync::CancellationToken;

use super::lines::{hunks, line_ops, split_lines, Hunk};
use crate::errors::CoreResult;

/// The two sides edit overlapping or adjacent base lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlap {
    /// First base line (0-based) involved in the overlap.
    pub base_line: usize,
}

impl fmt::Display for Overlap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "source and target edit overlapping lines near base line {}",
            self.base_line + 1
        )
    }
}

/// Merge `ours` and `theirs` relative to `base`.
///
/// The outer result carries cancellation; the inner result reports whether
/// the edits could be combined.
pub fn merge_lines(
    base: &str,
    ours: &str,
    theirs: &str,
    max_cells: usize,
    cancel: &CancellationToken,
) -> CoreResult<Result<String, Overlap>> {
    let ours_hunks = hunks(&line_ops(base, ours, max_cells, cancel)?);
    let theirs_hunks = hunks(&line_ops(base, theirs, max_cells, cancel)?);

    let mut combined: Vec<&Hunk> = Vec::with_capacity(ours_hunks.len() + theirs_hunks.len());
    for hunk in &ours_hunks {
        for other in theirs_hunks.iter().filter(|t| touches(hunk, t)) {
            if other != hunk {
                return Ok(Err(Overlap {
                    base_line: hunk.start.min(other.start),
                }));
            }
        }
        combined.push(hunk);
    }
    for hunk in &theirs_hunks {
        if !ours_hunks.contains(hunk) {
            combined.push(hunk);
        }
    }
    combined.sort_by_key(|h| (h.start, h.end));

    let base_lines = split_lines(base);
    let mut out = String::with_capacity(base.len().max(ours.len()).max(theirs.len()));
    let mut pos = 0;
    for hunk in combined {
        for line in &base_lines[pos..hunk.start] {
            out.push_str(line);
        }
        for line in &hunk.lines {
            out.push_str(line);
        }
        pos = hunk.end;
    }
    for line in &base_lines[pos..] {
        out.push_str(line);
    }
    Ok(Ok(out))
}

/// Closed-interval intersection of the base ranges.
fn touches(a: &Hunk, b: &Hunk) -> bool {
    a.start <= b.end && b.start <= a.end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge(base: &str, ours: &str, theirs: &str) -> Result<String, Overlap> {
        merge_lines(base, ours, theirs, usize::MAX, &CancellationToken::new()).unwrap()
    }

    #[test]
    fn test_non_overlapping_insertions_combine() {
        let base = "step login\nstep browse\nstep checkout\n";
        let ours = "step login\nstep search\nstep browse\nstep checkout\n";
        let theirs = "step login\nstep browse\nstep checkout\nstep logout\n";
        assert_eq!(
            merge(base, ours, theirs).unwrap(),
            "step login\nstep search\nstep browse\nstep checkout\nstep logout\n"
        );
    }

    #[test]
    fn test_merge_is_order_independent() {
        let base = "a\nb\nc\nd\ne\n";
        let ours = "A\nb\nc\nd\ne\n";
        let theirs = "a\nb\nc\nd\nE\n";
        assert_eq!(merge(base, ours, theirs), merge(base, theirs, ours));
        assert_eq!(merge(base, ours, theirs).unwrap(), "A\nb\nc\nd\nE\n");
    }

    #[test]
    fn test_insertions_at_same_point_overlap() {
        let base = "a\nb\n";
        let ours = "a\nx\nb\n";
        let theirs = "a\ny\nb\n";
        assert_eq!(merge(base, ours, theirs), Err(Overlap { base_line: 1 }));
    }

    #[test]
    fn test_overlapping_edits_rejected() {
        let base = "a\nb\nc\n";
        assert!(merge(base, "a\nB\nc\n", "a\nb2\nc\n").is_err());
    }

    #[test]
    fn test_identical_hunks_applied_once() {
        let base = "a\nb\n";
        let both = "a\nb\nc\n";
        assert_eq!(merge(base, both, both).unwrap(), both);
    }

    #[test]
    fn test_both_sides_add_to_empty_base() {
        assert!(merge("", "x\n", "y\n").is_err());
    }
}
