//! Cross-module properties of the snapshot, tree-diff and history engines.
//!
//! Runs entirely against MemoryStore and temp files.

use std::fs;

use vigil_core::history::HistoryDiffer;
use vigil_core::snapshot::SnapshotEngine;
use vigil_core::state_log::StateLog;
use vigil_core::store::{MemoryStore, ObjectStore};
use vigil_core::tracker::observe_tree;
use vigil_core::tree_diff::{DiffOptions, TreeDiffer};
use vigil_core::{ChangeAction, Error, FileMode, ObjectId, TreeEntry, TreeSide};

fn temp_log() -> (tempfile::TempDir, StateLog) {
    let dir = tempfile::TempDir::new().unwrap();
    let log = StateLog::new(dir.path().join("state.log"));
    (dir, log)
}

#[test]
fn snapshot_id_depends_only_on_content() {
    let (_dir, log) = temp_log();
    let first = MemoryStore::new();
    first.write_file("b/two.txt", "two\n");
    first.write_file("a/one.txt", "one\n");

    let second = MemoryStore::new();
    second.write_file("a/one.txt", "one\n");
    second.write_file("b/two.txt", "two\n");

    let a = SnapshotEngine::new(&first, &log).take().unwrap();
    let b = SnapshotEngine::new(&second, &log).take().unwrap();
    assert_eq!(a.id, b.id, "same files in a different write order must hash the same");

    let c = SnapshotEngine::new(&first, &log).take().unwrap();
    assert_eq!(a.id, c.id, "unchanged directory must keep its snapshot id");
}

#[test]
fn report_summary_tracks_change_list() {
    let (_dir, log) = temp_log();
    let store = MemoryStore::new();
    store.write_file("keep.txt", "same\n");
    store.write_file("edit.txt", "one\ntwo\n");
    store.write_file("gone.txt", "bye\n");
    store.write_file("move_me.txt", "alpha\nbeta\ngamma\ndelta\n");
    observe_tree(&store, &log, DiffOptions::default(), "proj").unwrap();

    store.write_file("edit.txt", "one\nthree\n");
    store.remove_file("gone.txt");
    store.remove_file("move_me.txt");
    store.write_file("moved.txt", "alpha\nbeta\ngamma\ndelta\n");
    store.write_file("fresh.txt", "x\ny\n");
    let observation = observe_tree(&store, &log, DiffOptions::default(), "proj").unwrap();
    let report = observation.report;

    assert_eq!(report.changes.len(), report.summary.files_changed);
    assert_eq!(report.summary.files_changed, 4);
    assert_eq!(report.summary.renames, 1);
    assert_eq!(
        report.summary.insertions,
        report.changes.iter().map(|c| c.lines_added).sum::<usize>()
    );
    assert_eq!(
        report.summary.deletions,
        report.changes.iter().map(|c| c.lines_deleted).sum::<usize>()
    );

    let paths: Vec<&str> = report.changes.iter().map(|c| c.sort_path()).collect();
    let mut sorted = paths.clone();
    sorted.sort_unstable();
    assert_eq!(paths, sorted, "changes must be ordered by path");

    let actions: Vec<ChangeAction> = report.changes.iter().map(|c| c.action).collect();
    assert_eq!(
        actions,
        [ChangeAction::Modify, ChangeAction::Insert, ChangeAction::Delete, ChangeAction::Rename]
    );
}

#[test]
fn diffing_a_snapshot_against_itself_is_empty() {
    let store = MemoryStore::new();
    let blob = store.insert_blob(b"hello\n");
    let id = store
        .write_tree(&[TreeEntry::new("hello.txt", FileMode::REGULAR, blob)])
        .unwrap();

    let report = TreeDiffer::new(&store, DiffOptions::default())
        .diff("proj", &id, &id)
        .unwrap();
    assert!(report.is_empty());
    assert_eq!(report.summary.files_changed, 0);
}

#[test]
fn unresolvable_new_snapshot_is_an_error() {
    let store = MemoryStore::new();
    let bogus: ObjectId = "0123456789abcdef0123456789abcdef01234567".parse().unwrap();
    let err = TreeDiffer::new(&store, DiffOptions::default())
        .diff("proj", &ObjectId::ZERO, &bogus)
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { side: TreeSide::New, .. }));
}

#[test]
fn corrupt_state_log_falls_back_to_full_insert() {
    let (dir, log) = temp_log();
    fs::write(dir.path().join("state.log"), "garbage\nmore garbage without an id\n").unwrap();
    assert!(log.last().is_zero());

    let store = MemoryStore::new();
    store.write_file("a.txt", "a\n");
    store.write_file("b.txt", "b\n");
    let report = observe_tree(&store, &log, DiffOptions::default(), "proj").unwrap().report;
    assert!(report.changes.iter().all(|c| c.action == ChangeAction::Insert));
    assert_eq!(report.changes.len(), 2);
}

#[test]
fn history_cycle_reports_each_command_once() {
    let dir = tempfile::TempDir::new().unwrap();
    let live = dir.path().join(".zsh_history");
    let archive = dir.path().join("archive");
    fs::write(&live, ": 1700000000:0;ls\n").unwrap();

    let differ = HistoryDiffer::new(&archive, &live);
    let first = differ.observe().unwrap();
    assert_eq!(first.report.commands.len(), 1);
    fs::write(&archive, &first.live_contents).unwrap();

    // The shell rewrote its history: deduplicated and reordered, plus one new line.
    fs::write(&live, ": 1700000010:2;make\n: 1700000000:0;ls\nnot a record\n").unwrap();
    let second = differ.observe().unwrap();
    let commands: Vec<(&str, i32)> = second
        .report
        .commands
        .iter()
        .map(|c| (c.command.as_str(), c.exit_code))
        .collect();
    assert_eq!(commands, [("make", 2)]);
    fs::write(&archive, &second.live_contents).unwrap();

    assert!(differ.observe().unwrap().report.is_empty());
}
