//! Background thread that owns the [`GitStore`] for its lifetime.
//!
//! All communication is via channels: `GitRequest` in over crossbeam, each
//! reply back over the request's own tokio oneshot.

use std::path::PathBuf;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use vigil_core::snapshot::{Snapshot, SnapshotEngine};
use vigil_core::state_log::StateLog;
use vigil_core::tracker::{capture_and_diff, TreeObservation};
use vigil_core::tree_diff::{DiffOptions, TreeDiffer};
use vigil_core::{ChangeReport, Error, Result, SnapshotId};

use crate::git::store::{Exclusions, GitStore};

/// Everything the worker needs to open the store and record snapshots.
#[derive(Debug, Clone)]
pub struct GitWorkerConfig {
    pub root: PathBuf,
    pub state_log: PathBuf,
    pub exclusions: Exclusions,
    pub diff: DiffOptions,
    pub subject: String,
}

/// Commands sent from the async side to the git worker thread.
#[derive(Debug)]
pub enum GitRequest {
    /// Snapshot and diff against the last logged state. Nothing is recorded.
    Observe { reply: oneshot::Sender<Result<TreeObservation>> },
    /// Append an observed snapshot to the state log.
    Commit {
        snapshot: Snapshot,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Capture and record a snapshot without diffing.
    Snapshot { reply: oneshot::Sender<Result<Snapshot>> },
    /// Diff two stored snapshots.
    Diff {
        old: SnapshotId,
        new: SnapshotId,
        reply: oneshot::Sender<Result<ChangeReport>>,
    },
}

/// Entry point for the background thread that owns the git store.
///
/// The store is opened lazily on the first request and reopened on the next
/// request if opening failed, so a directory that becomes a repository later
/// starts working without restarting the agent. Loops until every sender is dropped.
pub fn git_worker_loop(config: GitWorkerConfig, rx: Receiver<GitRequest>) {
    let log = StateLog::new(&config.state_log);
    let mut store: Option<GitStore> = None;

    for request in rx {
        if store.is_none() {
            match GitStore::open(&config.root, config.exclusions.clone()) {
                Ok(opened) => {
                    debug!(path = %config.root.display(), "git store opened");
                    store = Some(opened);
                }
                Err(e) => {
                    warn!(error = %e, "git store unavailable");
                    reply_err(request, e);
                    continue;
                }
            }
        }
        if let Some(store) = &store {
            handle_request(store, &log, &config, request);
        }
    }
    debug!("git worker channel closed; exiting");
}

fn handle_request(store: &GitStore, log: &StateLog, config: &GitWorkerConfig, request: GitRequest) {
    match request {
        GitRequest::Observe { reply } => {
            let _ = reply.send(capture_and_diff(store, log, config.diff, &config.subject));
        }
        GitRequest::Commit { snapshot, reply } => {
            let _ = reply.send(SnapshotEngine::new(store, log).commit(&snapshot));
        }
        GitRequest::Snapshot { reply } => {
            let _ = reply.send(SnapshotEngine::new(store, log).take());
        }
        GitRequest::Diff { old, new, reply } => {
            let _ = reply.send(TreeDiffer::new(store, config.diff).diff(&config.subject, &old, &new));
        }
    }
}

fn reply_err(request: GitRequest, e: Error) {
    match request {
        GitRequest::Observe { reply } => {
            let _ = reply.send(Err(e));
        }
        GitRequest::Commit { reply, .. } => {
            let _ = reply.send(Err(e));
        }
        GitRequest::Snapshot { reply } => {
            let _ = reply.send(Err(e));
        }
        GitRequest::Diff { reply, .. } => {
            let _ = reply.send(Err(e));
        }
    }
}

fn worker_gone() -> Error {
    Error::Backend("git worker thread has stopped".to_owned())
}

/// Async handle to the git worker thread.
///
/// Dropping the handle closes the request channel and joins the thread.
pub struct AsyncGit {
    tx: Option<Sender<GitRequest>>,
    thread: Option<JoinHandle<()>>,
}

impl AsyncGit {
    pub fn spawn(config: GitWorkerConfig) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let thread = std::thread::Builder::new()
            .name("vigil-git".to_owned())
            .spawn(move || git_worker_loop(config, rx))?;
        Ok(Self { tx: Some(tx), thread: Some(thread) })
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> GitRequest,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        let tx = self.tx.as_ref().ok_or_else(worker_gone)?;
        tx.send(make(reply)).map_err(|_| worker_gone())?;
        rx.await.map_err(|_| worker_gone())?
    }

    /// The state log is left alone; follow with [`AsyncGit::commit`].
    pub async fn observe(&self) -> Result<TreeObservation> {
        self.request(|reply| GitRequest::Observe { reply }).await
    }

    pub async fn commit(&self, snapshot: Snapshot) -> Result<()> {
        self.request(|reply| GitRequest::Commit { snapshot, reply }).await
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        self.request(|reply| GitRequest::Snapshot { reply }).await
    }

    pub async fn diff(&self, old: SnapshotId, new: SnapshotId) -> Result<ChangeReport> {
        self.request(|reply| GitRequest::Diff { old, new, reply }).await
    }
}

impl Drop for AsyncGit {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("git worker thread panicked");
            }
        }
    }
}
