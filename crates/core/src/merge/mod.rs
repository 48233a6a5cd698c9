//! Merge requests: base selection, conflict detection, resolution and
//! execution.
//!
//! [`MergeCoordinator`] owns the workflow; the submodules are pure functions
//! over snapshot content so they can be tested without a store.

pub mod apply;
mod base;
pub mod conflicts;
mod coordinator;
pub mod resolve;

pub use conflicts::{detect_conflicts, DetectedConflict};
pub use coordinator::MergeCoordinator;
