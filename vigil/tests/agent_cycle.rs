//! End-to-end agent cycles over a temporary repository and history file.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use vigil::agent::Agent;
use vigil::config::Config;
use vigil::git::store::GitStore;
use vigil::outbox::{self, ReportKind};
use vigil::paths::VigilPaths;
use vigil::shell::ShellEnv;
use vigil_core::state_log::StateLog;
use vigil_core::ChangeAction;

struct Fixture {
    _dir: tempfile::TempDir,
    _home: tempfile::TempDir,
    paths: VigilPaths,
    history: PathBuf,
    config: Config,
}

fn fixture() -> Fixture {
    let dir = tempfile::TempDir::new().unwrap();
    let home = tempfile::TempDir::new().unwrap();
    GitStore::ensure_repository(dir.path()).unwrap();
    let paths = VigilPaths::discover(dir.path());

    let history = home.path().join(".zsh_history");
    fs::write(&history, ": 1700000000:0;ls\n").unwrap();
    let config = Config { history_file: Some(history.clone()), ..Config::default() };

    Fixture { _dir: dir, _home: home, paths, history, config }
}

#[tokio::test]
async fn two_cycles_report_deltas_and_fill_the_outbox() {
    let fx = fixture();
    fs::write(fx.paths.root.join("main.rs"), "fn main() {}\n").unwrap();

    let agent = Agent::start(fx.paths.clone(), &fx.config, &ShellEnv::default()).await.unwrap();
    let first = agent.cycle().await;
    assert!(first.errors().is_empty(), "{:?}", first.errors());
    assert!(first.old_snapshot.unwrap().is_zero());

    let changes = first.changes.as_ref().unwrap();
    let paths: Vec<&str> = changes.changes.iter().map(|c| c.sort_path()).collect();
    assert_eq!(paths, ["main.rs"], "control dir must not appear in snapshots");
    assert_eq!(changes.changes[0].action, ChangeAction::Insert);
    assert_eq!(first.commands.as_ref().unwrap().commands.len(), 1);

    fs::write(fx.paths.root.join("main.rs"), "fn main() {\n    run();\n}\n").unwrap();
    let mut live = fs::read_to_string(&fx.history).unwrap();
    live.push_str(": 1700000050:0;cargo run\n");
    fs::write(&fx.history, live).unwrap();

    let second = agent.cycle().await;
    assert_eq!(second.old_snapshot, first.new_snapshot);
    let changes = second.changes.as_ref().unwrap();
    assert_eq!(changes.changes.len(), 1);
    assert_eq!(changes.changes[0].action, ChangeAction::Modify);
    let commands = &second.commands.as_ref().unwrap().commands;
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].command, "cargo run");

    let third = agent.cycle().await;
    assert!(third.changes.as_ref().unwrap().is_empty());
    assert!(third.commands.as_ref().unwrap().is_empty());

    let log = StateLog::new(&fx.paths.state_log);
    assert_eq!(log.entries().len(), 3);
    assert_eq!(Some(log.last()), third.new_snapshot);

    let conn = outbox::open_outbox(&fx.paths.outbox_db).await.unwrap();
    assert_eq!(outbox::pending_reports(&conn, 100).await.unwrap().len(), 6);
}

#[tokio::test]
async fn history_failure_does_not_block_the_tree_path() {
    let fx = fixture();
    fs::remove_file(&fx.history).unwrap();
    fs::write(fx.paths.root.join("a.txt"), "a\n").unwrap();

    let agent = Agent::start(fx.paths.clone(), &fx.config, &ShellEnv::default()).await.unwrap();
    let record = agent.cycle().await;
    assert!(record.tree_error.is_none());
    assert!(record.history_error.is_some());
    assert!(record.commands.is_none());
    assert_eq!(record.changes.unwrap().summary.files_changed, 1);
    assert!(!fx.paths.archive_for(&fx.history).exists());
}

#[tokio::test]
async fn corrupt_state_log_fails_the_tree_path_without_advancing() {
    let fx = fixture();
    fx.paths.ensure_layout().unwrap();
    let bogus = "2025-11-01T14:50:14Z 0123456789abcdef0123456789abcdef01234567\n";
    fs::write(&fx.paths.state_log, bogus).unwrap();

    let agent = Agent::start(fx.paths.clone(), &fx.config, &ShellEnv::default()).await.unwrap();
    let record = agent.cycle().await;
    assert!(record.tree_error.is_some());
    assert!(record.changes.is_none());
    assert_eq!(fs::read_to_string(&fx.paths.state_log).unwrap(), bogus);
    assert!(record.commands.is_some());
}

#[tokio::test]
async fn rejected_outbox_write_is_reported_again_next_cycle() {
    let fx = fixture();
    fs::write(fx.paths.root.join("a.txt"), "a\n").unwrap();
    let agent = Agent::start(fx.paths.clone(), &fx.config, &ShellEnv::default()).await.unwrap();

    // A second connection breaks the outbox underneath the agent.
    let db = rusqlite::Connection::open(&fx.paths.outbox_db).unwrap();
    db.execute_batch("DROP TABLE reports").unwrap();

    let failed = agent.cycle().await;
    assert!(failed.errors().is_empty(), "{:?}", failed.errors());
    assert!(StateLog::new(&fx.paths.state_log).entries().is_empty(), "state log must not advance");
    assert!(!fx.paths.archive_for(&fx.history).exists(), "history archive must not advance");

    db.execute_batch(outbox::schema::SCHEMA_V1_SQL).unwrap();
    let retried = agent.cycle().await;
    assert!(retried.old_snapshot.unwrap().is_zero());
    assert_eq!(retried.new_snapshot, failed.new_snapshot);
    assert_eq!(StateLog::new(&fx.paths.state_log).entries().len(), 1);
    assert!(fx.paths.archive_for(&fx.history).exists());

    let conn = outbox::open_outbox(&fx.paths.outbox_db).await.unwrap();
    let pending = outbox::pending_reports(&conn, 10).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|p| p.cycle_id == retried.id));

    let changes = pending.iter().find(|p| p.kind == ReportKind::Changes).unwrap();
    assert_eq!(changes.payload["changes"][0]["action"], "insert");
    assert_eq!(changes.payload["changes"][0]["new_path"], "a.txt");
    let commands = pending.iter().find(|p| p.kind == ReportKind::Commands).unwrap();
    assert_eq!(commands.payload["commands"][0]["command"], "ls");

    let settled = agent.cycle().await;
    assert!(settled.changes.unwrap().is_empty());
    assert!(settled.commands.unwrap().is_empty());
}

#[tokio::test]
async fn second_agent_on_same_directory_is_refused() {
    let fx = fixture();
    let _first = Agent::start(fx.paths.clone(), &fx.config, &ShellEnv::default()).await.unwrap();
    assert!(Agent::start(fx.paths.clone(), &fx.config, &ShellEnv::default()).await.is_err());
}

#[tokio::test]
async fn run_stops_when_shutdown_is_set() {
    let fx = fixture();
    let agent = Agent::start(fx.paths.clone(), &fx.config, &ShellEnv::default()).await.unwrap();
    let shutdown = Arc::new(AtomicBool::new(true));

    tokio::time::timeout(Duration::from_secs(10), agent.run(Duration::from_secs(3600), shutdown))
        .await
        .expect("driver must stop once the flag is set");
    assert_eq!(StateLog::new(&fx.paths.state_log).entries().len(), 1, "first tick runs one cycle");
}
