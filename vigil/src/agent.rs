//! The agent: one cycle runs the tree path and the history path concurrently,
//! records both outcomes in the outbox, and only then advances the state log
//! and the history archive. A cycle the outbox rejects is observed again next time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use time::OffsetDateTime;
use tokio::time::MissedTickBehavior;
use tokio_rusqlite::Connection;
use tracing::{debug, info, warn};
use vigil_core::history::{HistoryDiffer, HistoryObservation};
use vigil_core::snapshot::Snapshot;
use vigil_core::state_log::StateLog;
use vigil_core::tracker::TreeObservation;

use crate::config::Config;
use crate::git::store::Exclusions;
use crate::git::worker::{AsyncGit, GitWorkerConfig};
use crate::lock::AgentLock;
use crate::outbox::{self, CycleRecord};
use crate::paths::VigilPaths;
use crate::shell::{self, ShellEnv};

/// How often a waiting driver re-checks the shutdown flag.
const HEARTBEAT: Duration = Duration::from_millis(250);

pub struct Agent {
    paths: VigilPaths,
    git: AsyncGit,
    history: Result<Arc<HistoryDiffer>, String>,
    outbox: Option<Connection>,
    _lock: AgentLock,
}

impl Agent {
    /// Takes the directory lock, starts the git worker and opens the outbox.
    ///
    /// An unresolvable history source is not fatal: every cycle then reports it
    /// as the history error while the tree path keeps working.
    pub async fn start(paths: VigilPaths, config: &Config, env: &ShellEnv) -> anyhow::Result<Self> {
        paths.ensure_layout()?;
        let lock = AgentLock::acquire(&paths)?;

        let exclusions = Exclusions::new(&config.ignore).context("invalid ignore pattern in config")?;
        let git = AsyncGit::spawn(GitWorkerConfig {
            root: paths.root.clone(),
            state_log: paths.state_log.clone(),
            exclusions,
            diff: config.diff_options(),
            subject: paths.subject(),
        })
        .context("cannot start git worker thread")?;

        let history = shell::history_differ(&paths, config, env)
            .map(Arc::new)
            .map_err(|e| format!("{e:#}"));
        if let Err(e) = &history {
            warn!(error = %e, "shell history will not be tracked");
        }

        let outbox = if config.outbox {
            let conn = outbox::open_outbox(&paths.outbox_db)
                .await
                .with_context(|| format!("cannot open outbox {}", paths.outbox_db.display()))?;
            Some(conn)
        } else {
            None
        };

        Ok(Self { paths, git, history, outbox, _lock: lock })
    }

    pub fn paths(&self) -> &VigilPaths {
        &self.paths
    }

    pub fn git(&self) -> &AsyncGit {
        &self.git
    }

    /// Runs one cycle. Never fails as a whole: each path's error is captured
    /// in the returned record.
    pub async fn cycle(&self) -> CycleRecord {
        let started_at = OffsetDateTime::now_utc();
        let old = StateLog::new(&self.paths.state_log).last();

        let (tree, history) = tokio::join!(self.git.observe(), self.observe_history());
        let mut record = CycleRecord {
            id: uuid::Uuid::new_v4().to_string(),
            started_at,
            finished_at: OffsetDateTime::now_utc(),
            old_snapshot: Some(old),
            new_snapshot: None,
            changes: None,
            commands: None,
            tree_error: None,
            history_error: None,
        };

        let snapshot = match tree {
            Ok(TreeObservation { snapshot, report }) => {
                record.new_snapshot = Some(snapshot.id);
                record.changes = Some(report);
                Some(snapshot)
            }
            Err(e) => {
                warn!(error = %e, "tree observation failed; state log not advanced");
                record.tree_error = Some(e.to_string());
                None
            }
        };
        let live_contents = match history {
            Ok(HistoryObservation { report, live_contents }) => {
                record.commands = Some(report);
                Some(live_contents)
            }
            Err(e) => {
                warn!(error = %e, "history observation failed");
                record.history_error = Some(e);
                None
            }
        };

        info!(
            cycle = %record.id,
            files = record.changes.as_ref().map_or(0, |r| r.summary.files_changed),
            commands = record.commands.as_ref().map_or(0, |r| r.commands.len()),
            errors = record.errors().len(),
            "cycle finished"
        );

        if let Some(conn) = &self.outbox {
            if let Err(e) = outbox::record_cycle(conn, &record).await {
                warn!(
                    cycle = %record.id,
                    error = %e,
                    "failed to record cycle in outbox; state log and history archive not advanced"
                );
                return record;
            }
        }
        self.advance(snapshot, live_contents).await;
        record
    }

    async fn observe_history(&self) -> Result<HistoryObservation, String> {
        let differ = match &self.history {
            Ok(differ) => Arc::clone(differ),
            Err(e) => return Err(e.clone()),
        };
        tokio::task::spawn_blocking(move || differ.observe())
            .await
            .map_err(|e| format!("history task failed: {e}"))?
            .map_err(|e| e.to_string())
    }

    /// Moves the baselines past a recorded cycle. Failures only warn: the next
    /// cycle then re-reports the same changes rather than losing them.
    async fn advance(&self, snapshot: Option<Snapshot>, live_contents: Option<Vec<u8>>) {
        if let Some(snapshot) = snapshot {
            if let Err(e) = self.git.commit(snapshot).await {
                warn!(error = %e, "failed to append snapshot to state log");
            }
        }
        let (Some(contents), Ok(differ)) = (live_contents, &self.history) else {
            return;
        };
        let differ = Arc::clone(differ);
        let archived = tokio::task::spawn_blocking(move || {
            shell::replace_archive(differ.archive_path(), &contents)
        })
        .await
        .map_err(anyhow::Error::from)
        .and_then(|result| result);
        if let Err(e) = archived {
            warn!(error = %format!("{e:#}"), "failed to update history archive");
        }
    }

    /// Runs cycles every `interval` until `shutdown` is set.
    ///
    /// Each cycle completes before the next tick is taken, so cycles never
    /// overlap; ticks missed while a cycle runs long are not replayed.
    pub async fn run(&self, interval: Duration, shutdown: Arc<AtomicBool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(root = %self.paths.root.display(), interval_secs = interval.as_secs(), "agent running");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cycle().await;
                }
                _ = tokio::time::sleep(HEARTBEAT) => {}
            }
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
        }
        debug!("shutdown flag set; driver stopped");
    }
}
