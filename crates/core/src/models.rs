//! Domain model types used throughout SuiteBranch.
//!
//! These types bridge the engines, the database layer and the CLI. Every
//! enum that is persisted has a stable snake_case string form shared by
//! serde, `Display` and the SQLite columns.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Generates `as_str`, `Display` and `FromStr` for a fieldless enum from a
/// single variant/string table.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    )),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Branch
// ---------------------------------------------------------------------------

/// Lifecycle status of a branch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Active,
    Merged,
    Closed,
    Archived,
}

string_enum!(BranchStatus {
    Active => "active",
    Merged => "merged",
    Closed => "closed",
    Archived => "archived",
});

impl BranchStatus {
    /// Merged and archived branches accept no further snapshots.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Merged | Self::Archived)
    }
}

/// A named line of test-suite content with a single parent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Branch {
    pub id: String,
    pub suite_id: String,
    pub name: String,
    pub parent_branch_id: Option<String>,
    pub is_default: bool,
    pub status: BranchStatus,
    /// Head of the parent branch at the moment this branch was forked.
    pub forked_from_snapshot_id: Option<String>,
    pub head_snapshot_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Partial update applied by `BranchManager::update_branch`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchUpdate {
    pub name: Option<String>,
    pub status: Option<BranchStatus>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Payload supplied by the content generator for a capture.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotContent {
    #[serde(default)]
    pub code_files: BTreeMap<String, String>,
    #[serde(default)]
    pub scenarios: Vec<Value>,
    #[serde(default = "empty_object")]
    pub config: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Default for SnapshotContent {
    fn default() -> Self {
        Self {
            code_files: BTreeMap::new(),
            scenarios: Vec::new(),
            config: empty_object(),
        }
    }
}

impl SnapshotContent {
    /// Empty code and scenarios with the given config object.
    pub fn with_config(config: Value) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Line endings in code files are folded to `\n`.
    pub fn normalized(mut self) -> Self {
        for text in self.code_files.values_mut() {
            if text.contains('\r') {
                *text = text.replace("\r\n", "\n");
            }
        }
        self
    }

    /// SHA-256 over the canonical JSON encoding, hex encoded.
    ///
    /// Maps are ordered (`BTreeMap` and serde_json's sorted `Map`), so equal
    /// content always produces the same bytes.
    pub fn content_hash(&self) -> Result<String, serde_json::Error> {
        let canonical = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&canonical)))
    }
}

/// An immutable captured state of a branch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub id: String,
    pub branch_id: String,
    /// Store-assigned capture sequence; later captures have larger values.
    pub seq: i64,
    pub captured_at: DateTime<Utc>,
    pub content_hash: String,
    #[serde(flatten)]
    pub content: SnapshotContent,
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// How a path or key changed between two snapshots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
}

string_enum!(ChangeType {
    Added => "added",
    Removed => "removed",
    Modified => "modified",
});

/// One run of a line-level edit script.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LineOp {
    Equal { count: usize },
    Insert { lines: Vec<String> },
    Delete { lines: Vec<String> },
}

/// Change to a single generated code file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeChange {
    pub path: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub line_ops: Vec<LineOp>,
}

/// One step into a JSON document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

/// A location inside a JSON document, e.g. `env.hosts[2].url`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct KeyPath(pub Vec<PathSegment>);

impl KeyPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn key(key: impl Into<String>) -> Self {
        Self(vec![PathSegment::Key(key.into())])
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn child_key(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.to_string()));
        Self(segments)
    }

    pub fn child_index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    /// True when `self` equals `other` or lies above it.
    pub fn is_prefix_of(&self, other: &KeyPath) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("$");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if i == 0 => write!(f, "{key}")?,
                PathSegment::Key(key) => write!(f, ".{key}")?,
                PathSegment::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

/// Change at one key path of a JSON document.
///
/// `None` means the key is absent on that side, which is distinct from a
/// JSON `null` value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigChange {
    pub key_path: KeyPath,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Structured delta between two snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Diff {
    pub from_snapshot_id: String,
    pub to_snapshot_id: String,
    pub code_changes: Vec<CodeChange>,
    pub config_changes: Vec<ConfigChange>,
    /// Changes to the scenario list, rooted at `scenarios`.
    pub scenario_changes: Vec<ConfigChange>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.code_changes.is_empty()
            && self.config_changes.is_empty()
            && self.scenario_changes.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.code_changes.len() + self.config_changes.len() + self.scenario_changes.len()
    }
}

// ---------------------------------------------------------------------------
// Merge request
// ---------------------------------------------------------------------------

/// State of a merge request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeRequestStatus {
    Open,
    Conflict,
    Merged,
    Closed,
}

string_enum!(MergeRequestStatus {
    Open => "open",
    Conflict => "conflict",
    Merged => "merged",
    Closed => "closed",
});

impl MergeRequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Merged | Self::Closed)
    }
}

/// A proposal to fold one branch into another.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeRequest {
    pub id: String,
    pub source_branch_id: String,
    pub target_branch_id: String,
    pub base_snapshot_id: String,
    /// Source head the conflicts were computed against.
    pub source_head_snapshot_id: String,
    /// Target head recorded for the optimistic concurrency check.
    pub target_head_snapshot_id: String,
    pub status: MergeRequestStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub merged_snapshot_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Conflicts & resolutions
// ---------------------------------------------------------------------------

/// Which part of a snapshot a conflict lives in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Code,
    Config,
    Scenario,
}

string_enum!(ConflictKind {
    Code => "code",
    Config => "config",
    Scenario => "scenario",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Pending,
    Resolved,
}

string_enum!(ResolutionStatus {
    Pending => "pending",
    Resolved => "resolved",
});

/// A path changed divergently by source and target since the base.
///
/// Code values are JSON strings holding the file text; `None` means the file
/// or key does not exist on that side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeConflict {
    pub id: String,
    pub merge_request_id: String,
    /// File path for code conflicts, rendered key path otherwise.
    pub path: String,
    /// Structured key path for config and scenario conflicts.
    pub key_path: Option<KeyPath>,
    pub kind: ConflictKind,
    pub base_value: Option<Value>,
    pub source_value: Option<Value>,
    pub target_value: Option<Value>,
    pub resolution_status: ResolutionStatus,
    pub created_at: DateTime<Utc>,
}

/// Strategy chosen to settle a conflict.
///
/// `Custom(None)` removes the file or key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "strategy", content = "value", rename_all = "snake_case")]
pub enum Resolution {
    Source,
    Target,
    Both,
    Custom(Option<Value>),
}

impl Resolution {
    pub fn strategy(&self) -> ResolutionStrategy {
        match self {
            Self::Source => ResolutionStrategy::Source,
            Self::Target => ResolutionStrategy::Target,
            Self::Both => ResolutionStrategy::Both,
            Self::Custom(_) => ResolutionStrategy::Custom,
        }
    }
}

/// Persisted tag of a [`Resolution`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    Source,
    Target,
    Both,
    Custom,
}

string_enum!(ResolutionStrategy {
    Source => "source",
    Target => "target",
    Both => "both",
    Custom => "custom",
});

/// The value chosen for one conflict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConflictResolution {
    pub id: String,
    pub conflict_id: String,
    pub strategy: ResolutionStrategy,
    pub resolved_value: Option<Value>,
    pub resolved_by: String,
    pub resolved_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Created,
    ConflictDetected,
    Resolved,
    Merged,
    Closed,
}

string_enum!(HistoryAction {
    Created => "created",
    ConflictDetected => "conflict_detected",
    Resolved => "resolved",
    Merged => "merged",
    Closed => "closed",
});

/// An append-only audit entry for a merge request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeHistoryEntry {
    pub id: i64,
    pub merge_request_id: String,
    pub action: HistoryAction,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            MergeRequestStatus::Open,
            MergeRequestStatus::Conflict,
            MergeRequestStatus::Merged,
            MergeRequestStatus::Closed,
        ] {
            assert_eq!(status.as_str().parse::<MergeRequestStatus>(), Ok(status));
        }
        assert!("bogus".parse::<BranchStatus>().is_err());
        assert_eq!(HistoryAction::ConflictDetected.to_string(), "conflict_detected");
    }

    #[test]
    fn test_key_path_display() {
        let path = KeyPath::key("env").child_key("hosts").child_index(2).child_key("url");
        assert_eq!(path.to_string(), "env.hosts[2].url");
        assert_eq!(KeyPath::root().to_string(), "$");
    }

    #[test]
    fn test_key_path_prefix() {
        let parent = KeyPath::key("env");
        let child = parent.child_key("url");
        assert!(parent.is_prefix_of(&child));
        assert!(parent.is_prefix_of(&parent));
        assert!(!child.is_prefix_of(&parent));
        assert!(!KeyPath::key("envx").is_prefix_of(&child));
    }

    #[test]
    fn test_key_path_serializes_as_segment_array() {
        let path = KeyPath::key("steps").child_index(1);
        let encoded = serde_json::to_string(&path).unwrap();
        assert_eq!(encoded, r#"["steps",1]"#);
        let decoded: KeyPath = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, path);
    }

    #[test]
    fn test_content_hash_is_stable_and_content_sensitive() {
        let mut a = SnapshotContent::with_config(json!({"b": 1, "a": 2}));
        a.code_files.insert("t.spec".into(), "step\n".into());
        let b = a.clone();
        assert_eq!(a.content_hash().unwrap(), b.content_hash().unwrap());

        let mut c = a.clone();
        c.scenarios.push(json!({"name": "login"}));
        assert_ne!(a.content_hash().unwrap(), c.content_hash().unwrap());
    }

    #[test]
    fn test_normalized_folds_crlf() {
        let mut content = SnapshotContent::default();
        content.code_files.insert("a".into(), "x\r\ny\r\n".into());
        let content = content.normalized();
        assert_eq!(content.code_files["a"], "x\ny\n");
    }

    #[test]
    fn test_resolution_serde_shape() {
        let custom = Resolution::Custom(Some(json!(30)));
        let encoded = serde_json::to_value(&custom).unwrap();
        assert_eq!(encoded, json!({"strategy": "custom", "value": 30}));
        assert_eq!(custom.strategy(), ResolutionStrategy::Custom);
        let source: Resolution = serde_json::from_value(json!({"strategy": "source"})).unwrap();
        assert_eq!(source, Resolution::Source);
    }
}
