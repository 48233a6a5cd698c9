//! Line-based longest-common-subsequence diff.
//!
//! Lines keep their `\n` terminator so that a missing trailing newline is a
//! visible change. The common prefix and suffix are stripped before the
//! O(n·m) table is built; a middle section whose table would exceed the cell
//! budget is emitted as one delete+insert block instead.

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::errors::{CoreError, CoreResult};
use crate::models::LineOp;

/// Split text into lines, keeping terminators.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Compute the collapsed edit script turning `old` into `new`.
///
/// Within each changed region all deletions precede all insertions, so the
/// output shape only depends on the LCS alignment.
pub fn line_ops(
    old: &str,
    new: &str,
    max_cells: usize,
    cancel: &CancellationToken,
) -> CoreResult<Vec<LineOp>> {
    let a = split_lines(old);
    let b = split_lines(new);

    let prefix = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];

    let mut builder = OpBuilder::default();
    builder.equal(prefix);

    let cells = (a_mid.len() + 1).saturating_mul(b_mid.len() + 1);
    if cells > max_cells {
        warn!(
            old_lines = a_mid.len(),
            new_lines = b_mid.len(),
            max_cells,
            "line diff exceeds LCS budget, emitting block replacement"
        );
        for line in a_mid {
            builder.delete(line);
        }
        for line in b_mid {
            builder.insert(line);
        }
    } else {
        lcs_walk(a_mid, b_mid, &mut builder, cancel)?;
    }

    builder.equal(suffix);
    Ok(builder.finish())
}

/// Fill the suffix-LCS table and walk it front to back.
fn lcs_walk(
    a: &[&str],
    b: &[&str],
    builder: &mut OpBuilder,
    cancel: &CancellationToken,
) -> CoreResult<()> {
    let (n, m) = (a.len(), b.len());
    let width = m + 1;
    // table[i * width + j] = LCS length of a[i..] and b[j..]
    let mut table = vec![0u32; (n + 1) * width];

    for i in (0..n).rev() {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        for j in (0..m).rev() {
            table[i * width + j] = if a[i] == b[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            builder.equal(1);
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            builder.delete(a[i]);
            i += 1;
        } else {
            builder.insert(b[j]);
            j += 1;
        }
    }
    for line in &a[i..] {
        builder.delete(line);
    }
    for line in &b[j..] {
        builder.insert(line);
    }
    Ok(())
}

/// Accumulates single-line steps into collapsed [`LineOp`] runs.
#[derive(Default)]
struct OpBuilder {
    ops: Vec<LineOp>,
    equal_run: usize,
    deleted: Vec<String>,
    inserted: Vec<String>,
}

impl OpBuilder {
    fn equal(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.flush_change();
        self.equal_run += count;
    }

    fn delete(&mut self, line: &str) {
        self.flush_equal();
        self.deleted.push(line.to_string());
    }

    fn insert(&mut self, line: &str) {
        self.flush_equal();
        self.inserted.push(line.to_string());
    }

    fn flush_equal(&mut self) {
        if self.equal_run > 0 {
            self.ops.push(LineOp::Equal {
                count: self.equal_run,
            });
            self.equal_run = 0;
        }
    }

    fn flush_change(&mut self) {
        if !self.deleted.is_empty() {
            self.ops.push(LineOp::Delete {
                lines: std::mem::take(&mut self.deleted),
            });
        }
        if !self.inserted.is_empty() {
            self.ops.push(LineOp::Insert {
                lines: std::mem::take(&mut self.inserted),
            });
        }
    }

    fn finish(mut self) -> Vec<LineOp> {
        self.flush_change();
        self.flush_equal();
        self.ops
    }
}

/// A contiguous change against the old text: lines `start..end` are
/// replaced by `lines`. Pure insertions have `start == end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub start: usize,
    pub end: usize,
    pub lines: Vec<String>,
}

/// Group an edit script into hunks addressed in old-text line numbers.
pub fn hunks(ops: &[LineOp]) -> Vec<Hunk> {
    let mut out = Vec::new();
    let mut pos = 0;
    let mut current: Option<Hunk> = None;

    for op in ops {
        match op {
            LineOp::Equal { count } => {
                if let Some(hunk) = current.take() {
                    out.push(hunk);
                }
                pos += count;
            }
            LineOp::Delete { lines } => {
                let hunk = current.get_or_insert_with(|| Hunk {
                    start: pos,
                    end: pos,
                    lines: Vec::new(),
                });
                pos += lines.len();
                hunk.end = pos;
            }
            LineOp::Insert { lines } => {
                let hunk = current.get_or_insert_with(|| Hunk {
                    start: pos,
                    end: pos,
                    lines: Vec::new(),
                });
                hunk.lines.extend(lines.iter().cloned());
            }
        }
    }
    if let Some(hunk) = current {
        out.push(hunk);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rebuild the new text from the old text and an edit script.
    fn apply_ops(old: &str, ops: &[LineOp]) -> String {
        let lines = split_lines(old);
        let mut out = String::with_capacity(old.len());
        let mut pos = 0;
        for op in ops {
            match op {
                LineOp::Equal { count } => {
                    for line in &lines[pos..pos + count] {
                        out.push_str(line);
                    }
                    pos += count;
                }
                LineOp::Delete { lines: deleted } => pos += deleted.len(),
                LineOp::Insert { lines: inserted } => {
                    for line in inserted {
                        out.push_str(line);
                    }
                }
            }
        }
        out
    }

    fn ops(old: &str, new: &str) -> Vec<LineOp> {
        line_ops(old, new, usize::MAX, &CancellationToken::new()).unwrap()
    }

    fn strings(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_identical_text_is_single_equal_run() {
        assert_eq!(ops("a\nb\n", "a\nb\n"), vec![LineOp::Equal { count: 2 }]);
        assert!(ops("", "").is_empty());
    }

    #[test]
    fn test_middle_replacement() {
        let result = ops("a\nb\nc\n", "a\nB\nc\n");
        assert_eq!(
            result,
            vec![
                LineOp::Equal { count: 1 },
                LineOp::Delete { lines: strings(&["b\n"]) },
                LineOp::Insert { lines: strings(&["B\n"]) },
                LineOp::Equal { count: 1 },
            ]
        );
    }

    #[test]
    fn test_missing_trailing_newline_is_a_change() {
        let result = ops("a\nb\n", "a\nb");
        assert_eq!(
            result,
            vec![
                LineOp::Equal { count: 1 },
                LineOp::Delete { lines: strings(&["b\n"]) },
                LineOp::Insert { lines: strings(&["b"]) },
            ]
        );
    }

    #[test]
    fn test_lcs_finds_interleaved_matches() {
        let old = "x\na\ny\nb\nz\n";
        let new = "a\nq\nb\n";
        let result = ops(old, new);
        assert_eq!(apply_ops(old, &result), new);
        let equal: usize = result
            .iter()
            .map(|op| match op {
                LineOp::Equal { count } => *count,
                _ => 0,
            })
            .sum();
        assert_eq!(equal, 2);
    }

    #[test]
    fn test_budget_fallback_is_still_a_valid_script() {
        let old = "keep\n1\n2\n3\nend\n";
        let new = "keep\n3\n2\n1\nend\n";
        let result = line_ops(old, new, 4, &CancellationToken::new()).unwrap();
        assert_eq!(
            result,
            vec![
                LineOp::Equal { count: 1 },
                LineOp::Delete { lines: strings(&["1\n", "2\n", "3\n"]) },
                LineOp::Insert { lines: strings(&["3\n", "2\n", "1\n"]) },
                LineOp::Equal { count: 1 },
            ]
        );
        assert_eq!(apply_ops(old, &result), new);
    }

    #[test]
    fn test_cancelled_token_aborts() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = line_ops("a\nb\n", "c\nd\n", usize::MAX, &cancel);
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }

    #[test]
    fn test_hunks_use_old_line_numbers() {
        let old = "a\nb\nc\nd\n";
        let new = "a\nX\nc\nd\nY\n";
        let result = hunks(&ops(old, new));
        assert_eq!(
            result,
            vec![
                Hunk { start: 1, end: 2, lines: strings(&["X\n"]) },
                Hunk { start: 4, end: 4, lines: strings(&["Y\n"]) },
            ]
        );
    }
}
