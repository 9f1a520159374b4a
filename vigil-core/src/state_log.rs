//! Append-only log of `(timestamp, snapshot id)` pairs.
//!
//! One entry per line: `<RFC 3339 timestamp> <40-hex snapshot id>`. The log is
//! never rewritten; the last well-formed line is the current known state. Reading
//! is best-effort: a missing, unreadable, or wholly malformed log yields the zero id.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{format_timestamp, SnapshotId, StateLogEntry};

#[derive(Debug, Clone)]
pub struct StateLog {
    path: PathBuf,
}

/// Parses one log line; `None` when it is not a well-formed entry.
pub fn parse_line(line: &str) -> Option<StateLogEntry> {
    let mut fields = line.split_whitespace();
    let timestamp = fields.next()?;
    let snapshot = fields.next()?;
    if fields.next().is_some() {
        return None;
    }
    Some(StateLogEntry {
        timestamp: OffsetDateTime::parse(timestamp, &Rfc3339).ok()?,
        snapshot: snapshot.parse().ok()?,
    })
}

impl StateLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_text(&self) -> Option<String> {
        match fs::read(&self.path) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "state log absent");
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "state log unreadable");
                None
            }
        }
    }

    /// Snapshot id of the last well-formed entry, or the zero id.
    pub fn last(&self) -> SnapshotId {
        let Some(text) = self.read_text() else {
            return SnapshotId::ZERO;
        };

        let mut skipped = 0usize;
        for line in text.lines().rev().filter(|l| !l.trim().is_empty()) {
            match parse_line(line) {
                Some(entry) => {
                    if skipped > 0 {
                        warn!(skipped, "ignored malformed trailing state log lines");
                    }
                    return entry.snapshot;
                }
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(path = %self.path.display(), "state log has no well-formed entry; using zero id");
        }
        SnapshotId::ZERO
    }

    /// All well-formed entries in append order; malformed lines are skipped.
    pub fn entries(&self) -> Vec<StateLogEntry> {
        self.read_text()
            .map(|text| text.lines().filter_map(parse_line).collect())
            .unwrap_or_default()
    }

    /// Appends one entry as a single whole-line write, then syncs it to disk.
    pub fn append(&self, entry: &StateLogEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut line = String::new();
        if self.ends_mid_line()? {
            line.push('\n');
        }
        line.push_str(&format_timestamp(entry.timestamp)?);
        line.push(' ');
        line.push_str(&entry.snapshot.to_hex());
        line.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        debug!(snapshot = %entry.snapshot, "state log entry appended");
        Ok(())
    }

    /// True when the existing log does not end with a newline (an interrupted write).
    fn ends_mid_line(&self) -> Result<bool> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if file.metadata()?.len() == 0 {
            return Ok(false);
        }
        file.seek(SeekFrom::End(-1))?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last)?;
        Ok(last[0] != b'\n')
    }
}
