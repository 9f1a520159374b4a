//! Change-tracking engine for vigil.
//!
//! Captures content-addressed snapshots of a monitored directory, diffs them into
//! typed [`ChangeReport`]s, and reduces shell history files to newly issued
//! [`CommandEntry`]s. Storage goes through the [`store::ObjectStore`] seam so the
//! engines run unchanged over a git repository or the in-memory store.

pub mod content;
pub mod error;
pub mod history;
pub mod snapshot;
pub mod state_log;
pub mod store;
pub mod tracker;
pub mod tree_diff;
pub mod types;

pub use error::{Error, Result, TreeSide};
pub use types::{
    ChangeAction, ChangeReport, ChangeSummary, CommandEntry, CommandReport, FileChange, FileMode,
    ObjectId, SnapshotId, StateLogEntry, TreeEntry,
};
