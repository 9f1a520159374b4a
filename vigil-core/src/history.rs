//! History Diff Engine.
//!
//! Reduces an archived copy of a shell history file and the live file to the
//! commands newly issued. Shells may deduplicate or reorder history on write, so
//! the comparison is a multiset line diff rather than suffix slicing: every old
//! line cancels one equal line of the new file, and whatever is left over is new.
//!
//! New lines are parsed as `:<timestamp>:<exit code>;<command>` records. Lines that
//! do not fit that shape are dropped; an unparsable exit code becomes `-1`.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{CommandEntry, CommandReport};

/// Splits history text into trimmed, non-blank lines.
pub fn history_lines(text: &str) -> Vec<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
}

/// Lines of `new` not accounted for by `old`, in `new` order.
///
/// Each occurrence in `old` consumes at most one equal line of `new`.
pub fn unseen_lines<'n>(old: &[&str], new: &[&'n str]) -> Vec<&'n str> {
    let mut remaining: HashMap<&str, usize> = HashMap::with_capacity(old.len());
    for &line in old {
        *remaining.entry(line).or_default() += 1;
    }

    let mut unseen = Vec::new();
    for &line in new {
        match remaining.get_mut(line) {
            Some(count) if *count > 0 => *count -= 1,
            _ => unseen.push(line),
        }
    }
    unseen
}

/// Parses one `:<timestamp>:<exit code>;<command>` record.
///
/// Leading whitespace inside the metadata is tolerated, so zsh's
/// `: 1762008614:0;clear` parses too.
pub fn parse_record(line: &str) -> Option<CommandEntry> {
    let rest = line.strip_prefix(':')?;
    let (meta, command) = rest.split_once(';')?;

    let mut fields = meta.split(':');
    let timestamp = fields.next()?.trim();
    let exit_code = fields.next()?.trim();

    let timestamp = OffsetDateTime::from_unix_timestamp(timestamp.parse().ok()?).ok()?;
    Some(CommandEntry {
        timestamp,
        command: command.trim().to_owned(),
        exit_code: exit_code.parse().unwrap_or(-1),
    })
}

/// Multiset-diffs two history texts and parses the new lines.
///
/// Returns the parsed entries and the number of new lines that were dropped.
pub fn diff_history(old: &str, new: &str) -> (Vec<CommandEntry>, usize) {
    let old_lines = history_lines(old);
    let new_lines = history_lines(new);
    let unseen = unseen_lines(&old_lines, &new_lines);

    let total = unseen.len();
    let entries: Vec<CommandEntry> = unseen.into_iter().filter_map(parse_record).collect();
    let dropped = total - entries.len();
    (entries, dropped)
}

/// Outcome of one history observation: the report plus the exact live contents
/// it was computed from, which the caller archives as the next baseline.
#[derive(Debug, Clone)]
pub struct HistoryObservation {
    pub report: CommandReport,
    pub live_contents: Vec<u8>,
}

pub struct HistoryDiffer {
    archive: PathBuf,
    live: PathBuf,
}

impl HistoryDiffer {
    /// `archive` is the previous baseline copy (may not exist); `live` is required.
    pub fn new(archive: impl Into<PathBuf>, live: impl Into<PathBuf>) -> Self {
        Self { archive: archive.into(), live: live.into() }
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive
    }

    pub fn live_path(&self) -> &Path {
        &self.live
    }

    pub fn diff(&self) -> Result<CommandReport> {
        Ok(self.observe()?.report)
    }

    pub fn observe(&self) -> Result<HistoryObservation> {
        let live_contents = fs::read(&self.live)
            .map_err(|source| Error::Read { path: self.live.clone(), source })?;
        let old = self.read_archive();

        let (commands, dropped) = diff_history(&old, &String::from_utf8_lossy(&live_contents));
        if dropped > 0 {
            warn!(dropped, path = %self.live.display(), "skipped malformed history lines");
        }
        debug!(new_commands = commands.len(), "history diff computed");

        Ok(HistoryObservation { report: CommandReport { commands }, live_contents })
    }

    /// Archive contents, or empty when there is no usable baseline.
    fn read_archive(&self) -> String {
        match fs::read(&self.archive) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.archive.display(), "no history archive; diffing against empty baseline");
                String::new()
            }
            Err(e) => {
                warn!(path = %self.archive.display(), error = %e, "history archive unreadable; treating as empty");
                String::new()
            }
        }
    }
}
