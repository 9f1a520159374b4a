use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use vigil_core::{ChangeReport, CommandReport, SnapshotId};

/// Which report a `reports` row carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Changes,
    Commands,
}

impl ReportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportKind::Changes => "changes",
            ReportKind::Commands => "commands",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "changes" => Ok(ReportKind::Changes),
            "commands" => Ok(ReportKind::Commands),
            other => Err(format!("unknown report kind {other:?}")),
        }
    }
}

/// Everything one agent cycle produced, as written to the outbox.
///
/// The tree and history paths succeed or fail independently: a report is
/// present exactly when its error is absent.
#[derive(Debug, Clone)]
pub struct CycleRecord {
    /// UUID v4.
    pub id: String,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
    pub old_snapshot: Option<SnapshotId>,
    pub new_snapshot: Option<SnapshotId>,
    pub changes: Option<ChangeReport>,
    pub commands: Option<CommandReport>,
    pub tree_error: Option<String>,
    pub history_error: Option<String>,
}

impl CycleRecord {
    pub fn errors(&self) -> Vec<String> {
        let tree = self.tree_error.iter().map(|e| format!("tree: {e}"));
        let history = self.history_error.iter().map(|e| format!("history: {e}"));
        tree.chain(history).collect()
    }
}

/// An undelivered report as read back from the outbox.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingReport {
    pub id: i64,
    pub cycle_id: String,
    pub kind: ReportKind,
    pub payload: serde_json::Value,
    /// Unix seconds.
    pub created_at: i64,
}
