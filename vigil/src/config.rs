//! Agent configuration loaded from `.vigil/config.toml`.
//!
//! Every field has a default, so a missing file or a file that sets only a few
//! keys is valid. CLI flags override file values after loading.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vigil_core::tree_diff::DiffOptions;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse error in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between cycles of `vigil run`.
    pub interval_secs: u64,
    /// Shell whose history is watched. Defaults to the basename of `$SHELL`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    /// Explicit live history file. Defaults to `$HISTFILE`, then the shell's usual file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_file: Option<PathBuf>,
    /// Glob patterns excluded from snapshots, relative to the monitored directory.
    pub ignore: Vec<String>,
    pub rename_threshold: f32,
    pub detect_copies: bool,
    pub include_patch: bool,
    /// Record cycle results in `.vigil/outbox.db`.
    pub outbox: bool,
    /// Log to this file (relative paths resolve under `.vigil/`) instead of stderr.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let diff = DiffOptions::default();
        Self {
            interval_secs: 10,
            shell: None,
            history_file: None,
            ignore: Vec::new(),
            rename_threshold: diff.rename_threshold,
            detect_copies: diff.detect_copies,
            include_patch: diff.include_patch,
            outbox: true,
            log_file: None,
        }
    }
}

impl Config {
    /// Loads the config at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(LoadError::Io { path: path.to_path_buf(), source }),
        };
        toml::from_str(&raw).map_err(|source| LoadError::Parse { path: path.to_path_buf(), source })
    }

    /// Writes the default config to `path` unless a file is already there.
    /// Returns whether a file was written.
    pub fn write_default(path: &Path) -> anyhow::Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        let body = toml::to_string_pretty(&Self::default())?;
        std::fs::write(path, body)?;
        Ok(true)
    }

    pub fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            rename_threshold: self.rename_threshold.max(0.0),
            detect_copies: self.detect_copies,
            include_patch: self.include_patch,
        }
    }
}
