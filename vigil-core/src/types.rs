use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{Error, Result};

/// A 20-byte content-derived object identifier, rendered as 40 lowercase hex chars.
///
/// Used for blobs, trees, and snapshots alike. Identical content always maps to the
/// identical id. [`ObjectId::ZERO`] denotes "no prior snapshot".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId([u8; ObjectId::LEN]);

/// Identifier of a snapshot (the root tree of a captured directory state).
pub type SnapshotId = ObjectId;

impl ObjectId {
    /// Raw length in bytes.
    pub const LEN: usize = 20;

    /// The all-zero id, meaning "empty tree / no prior snapshot".
    pub const ZERO: ObjectId = ObjectId([0; Self::LEN]);

    pub const fn from_raw(raw: [u8; Self::LEN]) -> Self {
        Self(raw)
    }

    /// Builds an id from a byte slice, returning `None` unless it is exactly 20 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; Self::LEN] = bytes.try_into().ok()?;
        Some(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; Self::LEN]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != Self::LEN * 2 {
            return Err(Error::Parse(format!(
                "object id must be {} hex chars, got {:?}",
                Self::LEN * 2,
                s
            )));
        }
        let mut raw = [0u8; Self::LEN];
        hex::decode_to_slice(s, &mut raw)
            .map_err(|e| Error::Parse(format!("invalid object id {s:?}: {e}")))?;
        Ok(Self(raw))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Git-compatible file mode of a tree entry, rendered in octal (`100644`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileMode(u32);

impl FileMode {
    pub const TREE: FileMode = FileMode(0o040000);
    pub const REGULAR: FileMode = FileMode(0o100644);
    pub const EXECUTABLE: FileMode = FileMode(0o100755);
    pub const SYMLINK: FileMode = FileMode(0o120000);
    /// Submodule commit reference; has no blob content.
    pub const GITLINK: FileMode = FileMode(0o160000);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True when entries with this mode carry blob content that can be line-diffed.
    pub fn has_content(self) -> bool {
        self != Self::GITLINK && self != Self::TREE
    }
}

impl Default for FileMode {
    fn default() -> Self {
        Self::REGULAR
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06o}", self.0)
    }
}

impl fmt::Debug for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileMode({:06o})", self.0)
    }
}

impl FromStr for FileMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        u32::from_str_radix(s.trim(), 8)
            .map(FileMode)
            .map_err(|e| Error::Parse(format!("invalid file mode {s:?}: {e}")))
    }
}

impl Serialize for FileMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FileMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One file (or submodule) reachable from a snapshot.
///
/// `path` is slash-separated and relative to the monitored directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub mode: FileMode,
    pub id: ObjectId,
}

impl TreeEntry {
    pub fn new(path: impl Into<String>, mode: FileMode, id: ObjectId) -> Self {
        Self { path: path.into(), mode, id }
    }
}

/// One line of the append-only state log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateLogEntry {
    #[serde(with = "rfc3339")]
    pub timestamp: OffsetDateTime,
    pub snapshot: SnapshotId,
}

/// What happened to a path between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Insert,
    Delete,
    Modify,
    Rename,
    Copy,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeAction::Insert => "insert",
            ChangeAction::Delete => "delete",
            ChangeAction::Modify => "modify",
            ChangeAction::Rename => "rename",
            ChangeAction::Copy => "copy",
        };
        f.write_str(s)
    }
}

/// Per-path change record inside a [`ChangeReport`].
///
/// Old-side fields are absent on inserts and new-side fields are absent on deletes.
/// `lines_added` / `lines_deleted` are zero whenever no patch could be computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub action: ChangeAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_mode: Option<FileMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_mode: Option<FileMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_before: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_after: Option<ObjectId>,
    pub lines_added: usize,
    pub lines_deleted: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_text: Option<String>,
}

impl FileChange {
    /// Builds a change record from the entries on each side, with zero line counts.
    pub fn between(action: ChangeAction, old: Option<&TreeEntry>, new: Option<&TreeEntry>) -> Self {
        Self {
            action,
            old_path: old.map(|e| e.path.clone()),
            new_path: new.map(|e| e.path.clone()),
            old_mode: old.map(|e| e.mode),
            new_mode: new.map(|e| e.mode),
            hash_before: old.map(|e| e.id),
            hash_after: new.map(|e| e.id),
            lines_added: 0,
            lines_deleted: 0,
            patch_text: None,
        }
    }

    /// The path this change is ordered by: the new path when present, else the old one.
    pub fn sort_path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
    pub renames: usize,
    pub copies: usize,
}

impl ChangeSummary {
    /// Derives the summary from a change list; `files_changed` is always `changes.len()`.
    pub fn from_changes(changes: &[FileChange]) -> Self {
        let mut summary = ChangeSummary { files_changed: changes.len(), ..Default::default() };
        for change in changes {
            summary.insertions += change.lines_added;
            summary.deletions += change.lines_deleted;
            match change.action {
                ChangeAction::Rename => summary.renames += 1,
                ChangeAction::Copy => summary.copies += 1,
                _ => {}
            }
        }
        summary
    }
}

/// Structured difference between two snapshots of one monitored directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeReport {
    /// Name of the monitored directory the report describes.
    pub subject: String,
    pub old_id: SnapshotId,
    pub new_id: SnapshotId,
    #[serde(with = "rfc3339")]
    pub timestamp: OffsetDateTime,
    pub summary: ChangeSummary,
    pub changes: Vec<FileChange>,
}

impl ChangeReport {
    /// Assembles a report; the summary is always derived from `changes`.
    pub fn new(
        subject: impl Into<String>,
        old_id: SnapshotId,
        new_id: SnapshotId,
        timestamp: OffsetDateTime,
        changes: Vec<FileChange>,
    ) -> Self {
        let summary = ChangeSummary::from_changes(&changes);
        Self { subject: subject.into(), old_id, new_id, timestamp, summary, changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// A shell command newly found in the live history file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEntry {
    #[serde(with = "rfc3339")]
    pub timestamp: OffsetDateTime,
    pub command: String,
    /// `-1` when the record's exit-code field could not be parsed.
    pub exit_code: i32,
}

/// All commands issued since the archived history copy, in live-file order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReport {
    pub commands: Vec<CommandEntry>,
}

impl CommandReport {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Formats a timestamp as RFC 3339, the format used in the state log and reports.
pub fn format_timestamp(ts: OffsetDateTime) -> Result<String> {
    ts.format(&Rfc3339)
        .map_err(|e| Error::Parse(format!("cannot format timestamp {ts}: {e}")))
}

/// Serde adapter storing `OffsetDateTime` as an RFC 3339 string.
pub mod rfc3339 {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::format_description::well_known::Rfc3339;
    use time::OffsetDateTime;

    pub fn serialize<S: Serializer>(ts: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = ts.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&raw)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OffsetDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        OffsetDateTime::parse(&raw, &Rfc3339).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> ObjectId {
        ObjectId::from_raw([byte; ObjectId::LEN])
    }

    #[test]
    fn object_id_hex_round_trip_and_zero() {
        let hex = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";
        let parsed: ObjectId = hex.parse().unwrap();
        assert_eq!(parsed.to_string(), hex);
        assert!(!parsed.is_zero());
        assert!(ObjectId::ZERO.is_zero());
        assert_eq!(ObjectId::ZERO.to_string(), "0".repeat(40));
    }

    #[test]
    fn object_id_rejects_bad_input() {
        assert!("abc".parse::<ObjectId>().is_err());
        assert!("z".repeat(40).parse::<ObjectId>().is_err());
        assert!(ObjectId::from_bytes(&[1, 2, 3]).is_none());
    }

    #[test]
    fn file_mode_renders_octal() {
        assert_eq!(FileMode::REGULAR.to_string(), "100644");
        assert_eq!(FileMode::TREE.to_string(), "040000");
        assert_eq!("100755".parse::<FileMode>().unwrap(), FileMode::EXECUTABLE);
        assert!(!FileMode::GITLINK.has_content());
        assert!(FileMode::SYMLINK.has_content());
    }

    #[test]
    fn summary_is_derived_from_changes() {
        let a = TreeEntry::new("a.txt", FileMode::REGULAR, id(1));
        let b = TreeEntry::new("b.txt", FileMode::REGULAR, id(2));
        let mut modify = FileChange::between(ChangeAction::Modify, Some(&a), Some(&a));
        modify.lines_added = 3;
        modify.lines_deleted = 1;
        let rename = FileChange::between(ChangeAction::Rename, Some(&a), Some(&b));
        let insert = FileChange::between(ChangeAction::Insert, None, Some(&b));

        let report = ChangeReport::new(
            "proj",
            id(9),
            id(8),
            OffsetDateTime::UNIX_EPOCH,
            vec![modify, rename, insert],
        );
        assert_eq!(report.summary.files_changed, report.changes.len());
        assert_eq!(report.summary.insertions, 3);
        assert_eq!(report.summary.deletions, 1);
        assert_eq!(report.summary.renames, 1);
        assert_eq!(report.summary.copies, 0);
    }

    #[test]
    fn absent_sides_are_omitted_from_json() {
        let b = TreeEntry::new("b.txt", FileMode::REGULAR, id(2));
        let insert = FileChange::between(ChangeAction::Insert, None, Some(&b));
        let json = serde_json::to_value(&insert).unwrap();
        assert_eq!(json["action"], "insert");
        assert_eq!(json["new_path"], "b.txt");
        assert_eq!(json["new_mode"], "100644");
        assert!(json.get("old_path").is_none());
        assert!(json.get("hash_before").is_none());
        assert!(json.get("patch_text").is_none());
        assert_eq!(json["lines_added"], 0);
    }

    #[test]
    fn command_entry_serializes_rfc3339() {
        let entry = CommandEntry {
            timestamp: OffsetDateTime::from_unix_timestamp(1_762_008_614).unwrap(),
            command: "clear".to_owned(),
            exit_code: 0,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"timestamp\":\"2025-11-01T14:50:14Z\""), "{json}");
        let back: CommandEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
