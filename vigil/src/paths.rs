use std::path::{Path, PathBuf};

/// Name of the per-project control directory. Always excluded from snapshots.
pub const CONTROL_DIR: &str = ".vigil";

/// All well-known paths under `.vigil/`.
#[derive(Debug, Clone)]
pub struct VigilPaths {
    pub root: PathBuf,
    pub vigil_dir: PathBuf,
    pub state_log: PathBuf,
    pub config_toml: PathBuf,
    pub shell_dir: PathBuf,
    pub outbox_db: PathBuf,
    pub lock_file: PathBuf,
}

impl VigilPaths {
    /// Derive all paths from a monitored directory. Pure computation, no I/O.
    pub fn discover(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let vigil_dir = root.join(CONTROL_DIR);
        Self {
            state_log: vigil_dir.join("state.log"),
            config_toml: vigil_dir.join("config.toml"),
            shell_dir: vigil_dir.join("shell"),
            outbox_db: vigil_dir.join("outbox.db"),
            lock_file: vigil_dir.join("LOCK"),
            vigil_dir,
            root,
        }
    }

    /// Create all required directories. Idempotent.
    pub fn ensure_layout(&self) -> anyhow::Result<()> {
        for dir in [&self.vigil_dir, &self.shell_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.vigil_dir.is_dir()
    }

    /// Archive copy for a live history file: `.vigil/shell/<file name>`.
    pub fn archive_for(&self, live: &Path) -> PathBuf {
        let name = live
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "history".into());
        self.shell_dir.join(name)
    }

    /// Name reports are filed under: the monitored directory's own name.
    pub fn subject(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.root.display().to_string())
    }

    /// Resolves a relative path from the config against the control directory.
    pub fn in_control_dir(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.vigil_dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_hang_off_the_control_dir() {
        let p = VigilPaths::discover("/work/proj");
        assert_eq!(p.state_log, Path::new("/work/proj/.vigil/state.log"));
        assert_eq!(p.lock_file, Path::new("/work/proj/.vigil/LOCK"));
        assert_eq!(p.subject(), "proj");
        assert_eq!(
            p.archive_for(Path::new("/home/u/.zsh_history")),
            Path::new("/work/proj/.vigil/shell/.zsh_history")
        );
        assert_eq!(p.in_control_dir(Path::new("vigil.log")), Path::new("/work/proj/.vigil/vigil.log"));
    }

    #[test]
    fn ensure_layout_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let p = VigilPaths::discover(tmp.path());
        assert!(!p.is_initialized());
        p.ensure_layout().unwrap();
        p.ensure_layout().unwrap();
        assert!(p.is_initialized());
        assert!(p.shell_dir.is_dir());
    }
}
