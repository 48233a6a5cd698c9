//! SuiteBranch core library.
//!
//! Branching and merging for generated test suites: a branch tree per suite,
//! immutable content-hashed snapshots, structured diffs over code, scenarios
//! and configuration, and a merge-request workflow with explicit conflict
//! resolution. State lives in a single SQLite database.

pub mod branch;
pub mod config;
pub mod db;
pub mod diff;
pub mod errors;
pub mod merge;
pub mod models;
pub mod snapshot;

// Re-exports for convenience.
pub use branch::BranchManager;
pub use config::AppConfig;
pub use db::Database;
pub use diff::DiffEngine;
pub use errors::{CoreError, CoreResult};
pub use merge::MergeCoordinator;
pub use snapshot::SnapshotEngine;
