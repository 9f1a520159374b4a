//! Line-level diffing of blob contents.
//!
//! Used by the default [`ObjectStore::diff_content`](crate::store::ObjectStore::diff_content)
//! and by rename/copy detection. Binary content (a NUL byte within the first
//! [`BINARY_PROBE_LEN`] bytes, the same heuristic git uses) never produces a patch.

use similar::{ChangeTag, TextDiff};

/// Number of leading bytes inspected when classifying content as binary.
pub const BINARY_PROBE_LEN: usize = 8000;

/// Lines of unchanged context around each hunk in generated patches.
pub const CONTEXT_LINES: usize = 3;

/// Result of diffing two blob contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentDiff {
    pub lines_added: usize,
    pub lines_deleted: usize,
    /// Unified diff text; `None` for binary or identical content.
    pub patch: Option<String>,
}

pub fn is_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(BINARY_PROBE_LEN)].contains(&0)
}

/// Diffs two contents line by line.
///
/// `old_label` / `new_label` are the paths written into the patch header; `None`
/// renders as `/dev/null` (insertions and deletions).
pub fn diff_bytes(
    old: &[u8],
    new: &[u8],
    old_label: Option<&str>,
    new_label: Option<&str>,
) -> ContentDiff {
    if is_binary(old) || is_binary(new) {
        return ContentDiff::default();
    }

    let old_text = String::from_utf8_lossy(old);
    let new_text = String::from_utf8_lossy(new);
    let diff = TextDiff::from_lines(&*old_text, &*new_text);

    let mut lines_added = 0;
    let mut lines_deleted = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => lines_added += 1,
            ChangeTag::Delete => lines_deleted += 1,
            ChangeTag::Equal => {}
        }
    }
    if lines_added == 0 && lines_deleted == 0 {
        return ContentDiff::default();
    }

    let old_header = old_label.map_or_else(|| "/dev/null".to_owned(), |p| format!("a/{p}"));
    let new_header = new_label.map_or_else(|| "/dev/null".to_owned(), |p| format!("b/{p}"));
    let patch = diff
        .unified_diff()
        .context_radius(CONTEXT_LINES)
        .header(&old_header, &new_header)
        .to_string();

    ContentDiff { lines_added, lines_deleted, patch: Some(patch) }
}

/// Similarity ratio in `0.0..=1.0` between two contents.
///
/// Identical bytes score `1.0`; differing binary contents score `0.0`.
pub fn similarity(old: &[u8], new: &[u8]) -> f32 {
    if old == new {
        return 1.0;
    }
    if is_binary(old) || is_binary(new) {
        return 0.0;
    }
    let old_text = String::from_utf8_lossy(old);
    let new_text = String::from_utf8_lossy(new);
    TextDiff::from_lines(&*old_text, &*new_text).ratio()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_added_and_deleted_lines() {
        let diff = diff_bytes(b"a\nb\nc\n", b"a\nB\nc\nd\n", Some("f.txt"), Some("f.txt"));
        assert_eq!(diff.lines_added, 2);
        assert_eq!(diff.lines_deleted, 1);
        let patch = diff.patch.unwrap();
        assert!(patch.contains("--- a/f.txt"), "{patch}");
        assert!(patch.contains("+++ b/f.txt"), "{patch}");
        assert!(patch.contains("-b\n"));
        assert!(patch.contains("+B\n"));
    }

    #[test]
    fn insertion_uses_dev_null_header() {
        let diff = diff_bytes(b"", b"hello\n", None, Some("new.txt"));
        assert_eq!(diff.lines_added, 1);
        assert_eq!(diff.lines_deleted, 0);
        assert!(diff.patch.unwrap().contains("--- /dev/null"));
    }

    #[test]
    fn binary_content_yields_no_patch() {
        let diff = diff_bytes(b"\x00\x01\x02", b"\x00\x01\x03", Some("a.bin"), Some("a.bin"));
        assert_eq!(diff, ContentDiff::default());
    }

    #[test]
    fn identical_content_yields_no_patch() {
        let diff = diff_bytes(b"same\n", b"same\n", Some("x"), Some("x"));
        assert_eq!(diff, ContentDiff::default());
    }

    #[test]
    fn similarity_bounds() {
        assert_eq!(similarity(b"x\ny\n", b"x\ny\n"), 1.0);
        assert_eq!(similarity(b"\x00a", b"\x00b"), 0.0);
        let partial = similarity(b"a\nb\nc\nd\n", b"a\nb\nc\nX\n");
        assert!(partial > 0.5 && partial < 1.0, "{partial}");
        assert!(similarity(b"a\nb\n", b"x\ny\n") < 0.5);
    }
}
