//! vigil: change-tracking agent.
//!
//! Every command works on one monitored directory (`--path`, default `.`).
//! Reports and listings go to stdout as JSON; logs go to stderr, or to the
//! configured `log_file`, so stdout stays machine-readable.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vigil::agent::Agent;
use vigil::config::Config;
use vigil::git::store::{Exclusions, GitStore};
use vigil::git::worker::{AsyncGit, GitWorkerConfig};
use vigil::lock::AgentLock;
use vigil::paths::VigilPaths;
use vigil::shell::{self, ShellEnv};
use vigil::{outbox, signal};
use vigil_core::state_log::StateLog;
use vigil_core::SnapshotId;

#[derive(Debug, Parser)]
#[command(name = "vigil", version, about = "Tracks file and shell-history changes in a directory")]
struct Cli {
    /// Directory to monitor.
    #[arg(long, global = true, default_value = ".")]
    path: PathBuf,

    /// Debug-level logging (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Initialise the git repository, control directory and default config.
    Init,
    /// Run cycles periodically until SIGTERM or Ctrl-C.
    Run {
        /// Seconds between cycles; overrides `interval_secs` from the config.
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Run a single cycle and print its reports.
    Once,
    /// Take a snapshot, record it in the state log and print its id.
    Snapshot,
    /// Print the change report between two snapshot ids.
    Diff { old: SnapshotId, new: SnapshotId },
    /// Print commands issued since the archived history copy.
    History {
        /// Advance the archive to the current history afterwards.
        #[arg(long)]
        archive: bool,
    },
    /// Print the recorded snapshots.
    Log,
    /// Print undelivered outbox reports.
    Pending {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Mark outbox reports delivered.
    Ack {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vigil={level},vigil_core={level}")));

    let result = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("cannot initialise logging: {e}"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let root = std::fs::canonicalize(&cli.path)
        .with_context(|| format!("cannot resolve {}", cli.path.display()))?;
    let paths = VigilPaths::discover(root);

    // Config is read before logging exists; a load error is reported once it does.
    let (config, config_error) = match Config::load(&paths.config_toml) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    let log_file = match (&config.log_file, paths.is_initialized()) {
        (Some(file), true) => Some(paths.in_control_dir(file)),
        _ => None,
    };
    init_logging(cli.verbose, log_file.as_deref())?;
    if let Some(e) = config_error {
        warn!(error = %e, "using default configuration");
    }

    match cli.command {
        Command::Init => {
            let created = GitStore::ensure_repository(&paths.root)?;
            paths.ensure_layout()?;
            let wrote_config = Config::write_default(&paths.config_toml)?;
            info!(root = %paths.root.display(), created_repo = created, wrote_config, "initialised");
            println!("vigil initialised in {}", paths.vigil_dir.display());
        }
        Command::Run { interval } => {
            let secs = interval.unwrap_or(config.interval_secs).max(1);
            let shutdown = signal::register_sigterm().context("cannot register SIGTERM handler")?;
            signal::forward_ctrl_c(shutdown.clone());

            let agent = Agent::start(paths, &config, &ShellEnv::from_process()).await?;
            agent.run(Duration::from_secs(secs), shutdown).await;
        }
        Command::Once => {
            let agent = Agent::start(paths, &config, &ShellEnv::from_process()).await?;
            let record = agent.cycle().await;
            print_json(&serde_json::json!({
                "changes": record.changes,
                "commands": record.commands,
                "errors": record.errors(),
            }))?;
        }
        Command::Snapshot => {
            let agent = Agent::start(paths, &config, &ShellEnv::from_process()).await?;
            let snapshot = agent.git().snapshot().await?;
            println!("{}", snapshot.id);
        }
        Command::Diff { old, new } => {
            let git = AsyncGit::spawn(GitWorkerConfig {
                root: paths.root.clone(),
                state_log: paths.state_log.clone(),
                exclusions: Exclusions::new(&config.ignore)?,
                diff: config.diff_options(),
                subject: paths.subject(),
            })?;
            print_json(&git.diff(old, new).await?)?;
        }
        Command::History { archive } => {
            let differ = shell::history_differ(&paths, &config, &ShellEnv::from_process())?;
            // Advancing the archive races with a running agent, so it needs the lock.
            let _lock = if archive {
                paths.ensure_layout()?;
                Some(AgentLock::acquire(&paths)?)
            } else {
                None
            };
            print_json(&shell::observe_history(&differ, archive)?)?;
        }
        Command::Log => {
            print_json(&StateLog::new(&paths.state_log).entries())?;
        }
        Command::Pending { limit } => {
            let conn = outbox::open_outbox(&paths.outbox_db).await?;
            print_json(&outbox::pending_reports(&conn, limit).await?)?;
        }
        Command::Ack { ids } => {
            let conn = outbox::open_outbox(&paths.outbox_db).await?;
            let updated = outbox::mark_delivered(&conn, &ids).await?;
            println!("{updated} report(s) marked delivered");
        }
    }
    Ok(())
}
