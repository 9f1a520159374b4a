//! Shell history discovery and the archive copy that serves as the diff baseline.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tracing::{debug, warn};
use vigil_core::history::HistoryDiffer;
use vigil_core::CommandReport;

use crate::config::Config;
use crate::paths::VigilPaths;

/// Process environment consulted when the config leaves a choice open.
#[derive(Debug, Clone, Default)]
pub struct ShellEnv {
    pub shell: Option<String>,
    pub histfile: Option<PathBuf>,
    pub home: Option<PathBuf>,
}

impl ShellEnv {
    pub fn from_process() -> Self {
        let non_empty = |key: &str| std::env::var_os(key).filter(|v| !v.is_empty());
        Self {
            shell: non_empty("SHELL").map(|v| v.to_string_lossy().into_owned()),
            histfile: non_empty("HISTFILE").map(PathBuf::from),
            home: non_empty("HOME").map(PathBuf::from),
        }
    }
}

/// Shell name: config, else basename of `$SHELL`, else `bash`.
pub fn detect_shell(config: &Config, env: &ShellEnv) -> String {
    if let Some(shell) = &config.shell {
        return shell.clone();
    }
    env.shell
        .as_deref()
        .and_then(|s| Path::new(s).file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bash".to_owned())
}

/// Live history file for `shell`: config, else `$HISTFILE`, else the shell's usual file.
pub fn live_history_path(config: &Config, env: &ShellEnv, shell: &str) -> anyhow::Result<PathBuf> {
    if let Some(path) = &config.history_file {
        return Ok(path.clone());
    }
    if let Some(path) = &env.histfile {
        return Ok(path.clone());
    }
    let file = match shell {
        "bash" => ".bash_history",
        "zsh" => ".zsh_history",
        other => bail!("no default history file for shell {other:?}; set history_file in the config"),
    };
    let home = env.home.as_ref().context("HOME is not set; cannot locate shell history")?;
    Ok(home.join(file))
}

/// Builds the history differ for this directory: live file plus its archive copy.
pub fn history_differ(paths: &VigilPaths, config: &Config, env: &ShellEnv) -> anyhow::Result<HistoryDiffer> {
    let shell = detect_shell(config, env);
    let live = live_history_path(config, env, &shell)?;
    debug!(shell = %shell, live = %live.display(), "history source resolved");
    Ok(HistoryDiffer::new(paths.archive_for(&live), live))
}

/// Atomically replaces the archive with `contents` (temp file + rename).
pub fn replace_archive(archive: &Path, contents: &[u8]) -> anyhow::Result<()> {
    let parent = archive
        .parent()
        .ok_or_else(|| anyhow::anyhow!("no parent dir for {}", archive.display()))?;
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(archive)?;
    Ok(())
}

/// Diffs the live history against the archive and, when `archive` is set,
/// advances the archive to the exact contents that were diffed.
///
/// A failed diff leaves the archive untouched. A failed archive write is only
/// logged: the next cycle then re-reports the same commands rather than losing them.
pub fn observe_history(differ: &HistoryDiffer, archive: bool) -> vigil_core::Result<CommandReport> {
    let observation = differ.observe()?;
    if archive {
        if let Err(e) = replace_archive(differ.archive_path(), &observation.live_contents) {
            warn!(path = %differ.archive_path().display(), error = %e, "failed to update history archive");
        }
    }
    Ok(observation.report)
}
