//! Git integration for revgate.
//!
//! `GitDiffSource` turns a change request's `from_ref`/`to_ref` pair into
//! per-file diffs. `git2::Repository` is `!Send`, so it is opened fresh inside
//! whichever worker thread asks for diffs and never crosses a thread boundary.
pub mod diff;

pub use diff::GitDiffSource;
