//! One tree observation: previous state → new snapshot → change report.
//!
//! The new snapshot is appended to the state log only after the diff succeeds,
//! so a failed observation leaves the previous entry authoritative. Callers that
//! must persist the report first use [`capture_and_diff`] and commit afterwards.

use crate::error::Result;
use crate::snapshot::{Snapshot, SnapshotEngine};
use crate::state_log::StateLog;
use crate::store::{ObjectStore, Stage};
use crate::tree_diff::{DiffOptions, TreeDiffer};
use crate::types::ChangeReport;

#[derive(Debug, Clone)]
pub struct TreeObservation {
    pub snapshot: Snapshot,
    pub report: ChangeReport,
}

/// Captures a snapshot and diffs it against the last logged state without
/// touching the log. Pass the result's snapshot to [`SnapshotEngine::commit`]
/// once the report is safely stored.
pub fn capture_and_diff<S: ObjectStore + Stage>(
    store: &S,
    log: &StateLog,
    options: DiffOptions,
    subject: &str,
) -> Result<TreeObservation> {
    let old = log.last();
    let snapshot = SnapshotEngine::new(store, log).capture()?;
    let report = TreeDiffer::new(store, options).diff(subject, &old, &snapshot.id)?;
    Ok(TreeObservation { snapshot, report })
}

pub fn observe_tree<S: ObjectStore + Stage>(
    store: &S,
    log: &StateLog,
    options: DiffOptions,
    subject: &str,
) -> Result<TreeObservation> {
    let observation = capture_and_diff(store, log, options, subject)?;
    SnapshotEngine::new(store, log).commit(&observation.snapshot)?;
    Ok(observation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, TreeSide};
    use crate::store::MemoryStore;
    use crate::types::{ChangeAction, ObjectId, StateLogEntry};
    use time::OffsetDateTime;

    #[test]
    fn first_observation_reports_everything_as_inserted() {
        let dir = tempfile::tempdir().unwrap();
        let log = StateLog::new(dir.path().join("state.log"));
        let store = MemoryStore::new();
        store.write_file("README.md", "hello\n");

        let first = observe_tree(&store, &log, DiffOptions::default(), "proj").unwrap();
        assert!(first.report.old_id.is_zero());
        assert_eq!(first.report.changes.len(), 1);
        assert_eq!(first.report.changes[0].action, ChangeAction::Insert);
        assert_eq!(log.last(), first.snapshot.id);

        let second = observe_tree(&store, &log, DiffOptions::default(), "proj").unwrap();
        assert!(second.report.is_empty());
        assert_eq!(second.report.old_id, first.snapshot.id);
    }

    #[test]
    fn failed_diff_does_not_advance_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = StateLog::new(dir.path().join("state.log"));
        let bogus = ObjectId::from_raw([0x5a; ObjectId::LEN]);
        log.append(&StateLogEntry { timestamp: OffsetDateTime::UNIX_EPOCH, snapshot: bogus })
            .unwrap();

        let store = MemoryStore::new();
        store.write_file("a.txt", "a\n");
        let err = observe_tree(&store, &log, DiffOptions::default(), "proj").unwrap_err();
        assert!(matches!(err, Error::NotFound { side: TreeSide::Old, id } if id == bogus));
        assert_eq!(log.entries().len(), 1);
        assert_eq!(log.last(), bogus);
    }

    #[test]
    fn uncommitted_observation_is_repeated_until_committed() {
        let dir = tempfile::tempdir().unwrap();
        let log = StateLog::new(dir.path().join("state.log"));
        let store = MemoryStore::new();
        store.write_file("a.txt", "a\n");

        let first = capture_and_diff(&store, &log, DiffOptions::default(), "proj").unwrap();
        assert!(log.entries().is_empty());
        let again = capture_and_diff(&store, &log, DiffOptions::default(), "proj").unwrap();
        assert_eq!(again.report.changes, first.report.changes);
        assert!(again.report.old_id.is_zero());

        SnapshotEngine::new(&store, &log).commit(&again.snapshot).unwrap();
        let after = capture_and_diff(&store, &log, DiffOptions::default(), "proj").unwrap();
        assert!(after.report.is_empty());
        assert_eq!(after.report.old_id, again.snapshot.id);
    }
}
