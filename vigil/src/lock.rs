//! One agent per monitored directory.
//!
//! The lock is an advisory lock on `.vigil/LOCK` held for the agent's lifetime,
//! so it goes away with the process. The holder writes its pid into the file
//! and a refused start reports it.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use anyhow::Context;
use fs2::FileExt;
use tracing::debug;

use crate::paths::VigilPaths;

pub struct AgentLock {
    _file: File,
}

impl AgentLock {
    /// Takes the directory lock without blocking.
    ///
    /// Expects the control directory to exist (`VigilPaths::ensure_layout`).
    pub fn acquire(paths: &VigilPaths) -> anyhow::Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&paths.lock_file)
            .with_context(|| format!("cannot open lock file {}", paths.lock_file.display()))?;

        if file.try_lock_exclusive().is_err() {
            let holder = holder_pid(&mut file)
                .map_or_else(|| "unknown pid".to_owned(), |pid| format!("pid {pid}"));
            anyhow::bail!(
                "another vigil agent ({holder}) is already monitoring {}",
                paths.root.display()
            );
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", std::process::id())?;
        debug!(path = %paths.lock_file.display(), "agent lock taken");
        Ok(Self { _file: file })
    }
}

fn holder_pid(file: &mut File) -> Option<u32> {
    let mut text = String::new();
    file.read_to_string(&mut text).ok()?;
    text.trim().parse().ok()
}
