//! Snapshot Engine.
//!
//! Captures the staged-index state of the monitored directory as a tree object
//! and records it in the [`StateLog`]. No commit is created and no branch or HEAD
//! is moved.

use time::OffsetDateTime;
use tracing::{debug, info};

use crate::error::Result;
use crate::state_log::StateLog;
use crate::store::{ObjectStore, Stage, StageStats};
use crate::types::{SnapshotId, StateLogEntry};

/// A captured directory state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub taken_at: OffsetDateTime,
    pub stats: StageStats,
    pub entry_count: usize,
}

pub struct SnapshotEngine<'a, S> {
    store: &'a S,
    log: &'a StateLog,
}

impl<'a, S: ObjectStore + Stage> SnapshotEngine<'a, S> {
    pub fn new(store: &'a S, log: &'a StateLog) -> Self {
        Self { store, log }
    }

    /// Stages the working directory and writes its tree, without touching the log.
    pub fn capture(&self) -> Result<Snapshot> {
        let staged = self.store.stage_all()?;
        debug!(
            added = staged.stats.added,
            modified = staged.stats.modified,
            deleted = staged.stats.deleted,
            entries = staged.entries.len(),
            "index staged"
        );

        let id = self.store.write_tree(&staged.entries)?;
        Ok(Snapshot {
            id,
            taken_at: OffsetDateTime::now_utc(),
            stats: staged.stats,
            entry_count: staged.entries.len(),
        })
    }

    /// Records a captured snapshot as the current known state.
    pub fn commit(&self, snapshot: &Snapshot) -> Result<()> {
        self.log.append(&StateLogEntry { timestamp: snapshot.taken_at, snapshot: snapshot.id })?;
        info!(snapshot = %snapshot.id, "snapshot recorded");
        Ok(())
    }

    /// Captures and records in one step.
    pub fn take(&self) -> Result<Snapshot> {
        let snapshot = self.capture()?;
        self.commit(&snapshot)?;
        Ok(snapshot)
    }
}
