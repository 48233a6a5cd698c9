//! Error types for the SuiteBranch core library.
//!
//! Each subsystem that talks to the outside world (SQLite, the config file)
//! has its own error type derived with `thiserror`. The top-level
//! [`CoreError`] carries the workflow taxonomy that callers branch on:
//! validation, missing records, unresolved conflicts, stale branches,
//! incompatible resolutions and persistence failures.

use thiserror::Error;

/// Convenience alias used by every engine in the crate.
pub type CoreResult<T> = Result<T, CoreError>;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the branching and merge workflow.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad input: duplicate name, missing parent, illegal transition, ...
    #[error("validation failed: {0}")]
    Validation(String),

    /// An unknown branch, snapshot, merge request or conflict id.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A merge was attempted while conflicts are still pending.
    #[error(
        "merge request {merge_request_id} has {} unresolved conflict(s): {}",
        .unresolved.len(),
        .unresolved.join(", ")
    )]
    Conflict {
        merge_request_id: String,
        unresolved: Vec<String>,
    },

    /// The target branch moved since the merge request was computed.
    #[error(
        "branch {branch_id} is stale: expected head {expected}, found {}",
        .actual.as_deref().unwrap_or("<none>")
    )]
    StaleBranch {
        branch_id: String,
        expected: String,
        actual: Option<String>,
    },

    /// The chosen strategy cannot settle this kind of conflict.
    #[error("incompatible resolution for conflict {conflict_id}: {detail}")]
    IncompatibleResolution { conflict_id: String, detail: String },

    /// The underlying store failed.
    #[error(transparent)]
    Persistence(#[from] DatabaseError),

    /// A long-running computation observed caller cancellation.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Stored JSON could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn validation(detail: impl Into<String>) -> Self {
        Self::Validation(detail.into())
    }

    pub fn not_found(entity: &str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.into(),
        }
    }

    /// Process exit code used by the CLI for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::NotFound { .. } => 3,
            Self::Conflict { .. } => 4,
            Self::StaleBranch { .. } => 5,
            Self::IncompatibleResolution { .. } => 6,
            Self::Persistence(_) | Self::Serialization(_) => 7,
            Self::Cancelled => 8,
            Self::Config(_) => 1,
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Persistence(DatabaseError::SqliteError(err))
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A stored column held a value outside its domain.
    #[error("corrupt value in {column}: {value}")]
    CorruptValue { column: String, value: String },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_error_enumerates_ids() {
        let err = CoreError::Conflict {
            merge_request_id: "mr-1".into(),
            unresolved: vec!["c-1".into(), "c-2".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 unresolved"));
        assert!(msg.contains("c-1, c-2"));
    }

    #[test]
    fn test_stale_branch_message() {
        let err = CoreError::StaleBranch {
            branch_id: "b".into(),
            expected: "s1".into(),
            actual: Some("s2".into()),
        };
        assert_eq!(
            err.to_string(),
            "branch b is stale: expected head s1, found s2"
        );
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = vec![
            CoreError::validation("x"),
            CoreError::not_found("branch", "x"),
            CoreError::Conflict {
                merge_request_id: "m".into(),
                unresolved: vec![],
            },
            CoreError::StaleBranch {
                branch_id: "b".into(),
                expected: "e".into(),
                actual: None,
            },
            CoreError::IncompatibleResolution {
                conflict_id: "c".into(),
                detail: "d".into(),
            },
            CoreError::Persistence(DatabaseError::CorruptValue {
                column: "c".into(),
                value: "v".into(),
            }),
            CoreError::Cancelled,
        ];
        let mut codes: Vec<u8> = errors.iter().map(CoreError::exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), 7);
        assert!(!codes.contains(&0));
    }

    #[test]
    fn test_sqlite_error_maps_to_persistence() {
        let err: CoreError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, CoreError::Persistence(_)));
    }
}
