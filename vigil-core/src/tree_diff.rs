//! Tree Diff Engine.
//!
//! Compares two snapshots path by path and produces a [`ChangeReport`]. Paths
//! present on one side only become inserts/deletes; paths whose content or mode
//! differ become modifications. Deletions are then paired with insertions of the
//! same or similar content to form renames, and (optionally) insertions are
//! matched against surviving old paths to form copies.
//!
//! Resolving either snapshot is fatal on failure and reports the failing side.
//! Content diffing is best-effort: binary or unreadable blobs leave the patch
//! unset and the line counts at zero.

use std::collections::BTreeMap;

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::error::{Error, Result, TreeSide};
use crate::store::{BlobRef, ObjectStore};
use crate::types::{ChangeAction, ChangeReport, FileChange, SnapshotId, TreeEntry};

/// Upper bound on `deleted × inserted` similarity comparisons per diff.
///
/// Above it only exact-content renames and copies are detected.
pub const SIMILARITY_PAIR_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffOptions {
    /// Minimum similarity ratio (0.0–1.0) for a delete/insert pair to become a rename
    /// or copy. Exact-content matches always pair; values above 1.0 allow only those.
    pub rename_threshold: f32,
    pub detect_copies: bool,
    /// Keep unified patch text on each change. Line counts are computed regardless.
    pub include_patch: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self { rename_threshold: 0.5, detect_copies: false, include_patch: true }
    }
}

#[derive(Debug, Clone, Copy)]
enum Pairing<'t> {
    Insert(&'t TreeEntry),
    Delete(&'t TreeEntry),
    Modify(&'t TreeEntry, &'t TreeEntry),
    Rename(&'t TreeEntry, &'t TreeEntry),
    Copy(&'t TreeEntry, &'t TreeEntry),
}

impl<'t> Pairing<'t> {
    fn sides(self) -> (ChangeAction, Option<&'t TreeEntry>, Option<&'t TreeEntry>) {
        match self {
            Pairing::Insert(new) => (ChangeAction::Insert, None, Some(new)),
            Pairing::Delete(old) => (ChangeAction::Delete, Some(old), None),
            Pairing::Modify(old, new) => (ChangeAction::Modify, Some(old), Some(new)),
            Pairing::Rename(old, new) => (ChangeAction::Rename, Some(old), Some(new)),
            Pairing::Copy(old, new) => (ChangeAction::Copy, Some(old), Some(new)),
        }
    }
}

pub struct TreeDiffer<'a, S> {
    store: &'a S,
    options: DiffOptions,
}

impl<'a, S: ObjectStore> TreeDiffer<'a, S> {
    pub fn new(store: &'a S, options: DiffOptions) -> Self {
        Self { store, options }
    }

    /// Computes the change report from `old` to `new`. Either id may be zero
    /// (the empty tree).
    pub fn diff(&self, subject: &str, old: &SnapshotId, new: &SnapshotId) -> Result<ChangeReport> {
        let old_entries = self.resolve(old, TreeSide::Old)?;
        let new_entries = self.resolve(new, TreeSide::New)?;
        let timestamp = OffsetDateTime::now_utc();

        if old == new {
            debug!(snapshot = %new, "snapshots identical; empty report");
            return Ok(ChangeReport::new(subject, *old, *new, timestamp, Vec::new()));
        }

        let mut changes: Vec<FileChange> = self
            .pair(&old_entries, &new_entries)
            .into_iter()
            .map(|p| self.describe(p))
            .collect();
        changes.sort_by(|a, b| a.sort_path().cmp(b.sort_path()));

        let report = ChangeReport::new(subject, *old, *new, timestamp, changes);
        info!(
            old = %old,
            new = %new,
            files = report.summary.files_changed,
            insertions = report.summary.insertions,
            deletions = report.summary.deletions,
            "tree diff computed"
        );
        Ok(report)
    }

    fn resolve(&self, id: &SnapshotId, side: TreeSide) -> Result<Vec<TreeEntry>> {
        if id.is_zero() {
            return Ok(Vec::new());
        }
        self.store.read_tree(id).map_err(|e| match e {
            Error::ObjectMissing(_) => Error::NotFound { side, id: *id },
            other => other,
        })
    }

    fn pair<'t>(&self, old: &'t [TreeEntry], new: &'t [TreeEntry]) -> Vec<Pairing<'t>> {
        let old_by_path: BTreeMap<&str, &TreeEntry> =
            old.iter().map(|e| (e.path.as_str(), e)).collect();
        let new_by_path: BTreeMap<&str, &TreeEntry> =
            new.iter().map(|e| (e.path.as_str(), e)).collect();

        let mut pairings = Vec::new();
        let mut deleted = Vec::new();
        for (path, &o) in &old_by_path {
            match new_by_path.get(path) {
                Some(&n) if n.id != o.id || n.mode != o.mode => pairings.push(Pairing::Modify(o, n)),
                Some(_) => {}
                None => deleted.push(o),
            }
        }
        let inserted: Vec<&TreeEntry> = new_by_path
            .iter()
            .filter(|(path, _)| !old_by_path.contains_key(*path))
            .map(|(_, &n)| n)
            .collect();

        let (renames, deleted, inserted) = self.detect_renames(deleted, inserted);
        pairings.extend(renames);

        let inserted = if self.options.detect_copies {
            let sources: Vec<&TreeEntry> = old_by_path
                .iter()
                .filter(|(path, e)| new_by_path.contains_key(*path) && e.mode.has_content())
                .map(|(_, &e)| e)
                .collect();
            let (copies, rest) = self.detect_copies(&sources, inserted);
            pairings.extend(copies);
            rest
        } else {
            inserted
        };

        pairings.extend(deleted.into_iter().map(Pairing::Delete));
        pairings.extend(inserted.into_iter().map(Pairing::Insert));
        pairings
    }

    fn detect_renames<'t>(
        &self,
        deleted: Vec<&'t TreeEntry>,
        inserted: Vec<&'t TreeEntry>,
    ) -> (Vec<Pairing<'t>>, Vec<&'t TreeEntry>, Vec<&'t TreeEntry>) {
        let mut del_used = vec![false; deleted.len()];
        let mut ins_used = vec![false; inserted.len()];
        let mut renames = Vec::new();

        for (i, n) in inserted.iter().enumerate() {
            if !n.mode.has_content() {
                continue;
            }
            let exact = (0..deleted.len())
                .find(|&d| !del_used[d] && deleted[d].id == n.id && deleted[d].mode.has_content());
            if let Some(d) = exact {
                del_used[d] = true;
                ins_used[i] = true;
                renames.push(Pairing::Rename(deleted[d], n));
            }
        }

        let open_del: Vec<usize> = (0..deleted.len())
            .filter(|&d| !del_used[d] && deleted[d].mode.has_content())
            .collect();
        let open_ins: Vec<usize> = (0..inserted.len())
            .filter(|&i| !ins_used[i] && inserted[i].mode.has_content())
            .collect();

        if self.options.rename_threshold <= 1.0 && !open_del.is_empty() && !open_ins.is_empty() {
            if open_del.len() * open_ins.len() > SIMILARITY_PAIR_LIMIT {
                debug!(
                    deleted = open_del.len(),
                    inserted = open_ins.len(),
                    "too many candidates; skipping inexact rename detection"
                );
            } else {
                let mut candidates = Vec::new();
                for &d in &open_del {
                    for &i in &open_ins {
                        if let Some(score) = self.score(deleted[d], inserted[i]) {
                            candidates.push((score, d, i));
                        }
                    }
                }
                candidates.sort_by(|a, b| {
                    b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2))
                });
                for (_, d, i) in candidates {
                    if !del_used[d] && !ins_used[i] {
                        del_used[d] = true;
                        ins_used[i] = true;
                        renames.push(Pairing::Rename(deleted[d], inserted[i]));
                    }
                }
            }
        }

        let deleted = deleted
            .into_iter()
            .zip(del_used)
            .filter_map(|(e, used)| (!used).then_some(e))
            .collect();
        let inserted = inserted
            .into_iter()
            .zip(ins_used)
            .filter_map(|(e, used)| (!used).then_some(e))
            .collect();
        (renames, deleted, inserted)
    }

    fn detect_copies<'t>(
        &self,
        sources: &[&'t TreeEntry],
        inserted: Vec<&'t TreeEntry>,
    ) -> (Vec<Pairing<'t>>, Vec<&'t TreeEntry>) {
        let allow_inexact = self.options.rename_threshold <= 1.0
            && sources.len() * inserted.len() <= SIMILARITY_PAIR_LIMIT;
        let mut copies = Vec::new();
        let mut rest = Vec::new();

        for n in inserted {
            if !n.mode.has_content() {
                rest.push(n);
                continue;
            }
            let source = sources.iter().copied().find(|s| s.id == n.id).or_else(|| {
                if !allow_inexact {
                    return None;
                }
                sources
                    .iter()
                    .filter_map(|&s| self.score(s, n).map(|score| (score, s)))
                    .max_by(|a, b| a.0.total_cmp(&b.0).then(b.1.path.cmp(&a.1.path)))
                    .map(|(_, s)| s)
            });
            match source {
                Some(s) => copies.push(Pairing::Copy(s, n)),
                None => rest.push(n),
            }
        }
        (copies, rest)
    }

    /// Similarity of two entries when it reaches the threshold.
    fn score(&self, old: &TreeEntry, new: &TreeEntry) -> Option<f32> {
        match self.store.similarity(&old.id, &new.id) {
            Ok(score) if score >= self.options.rename_threshold => Some(score),
            Ok(_) => None,
            Err(e) => {
                warn!(old = %old.path, new = %new.path, error = %e, "similarity unavailable");
                None
            }
        }
    }

    fn describe(&self, pairing: Pairing<'_>) -> FileChange {
        let (action, old, new) = pairing.sides();
        let mut change = FileChange::between(action, old, new);

        let has_content = old.is_none_or(|e| e.mode.has_content())
            && new.is_none_or(|e| e.mode.has_content());
        if !has_content || old.map(|e| e.id) == new.map(|e| e.id) {
            return change;
        }

        match self.store.diff_content(old.map(BlobRef::of), new.map(BlobRef::of)) {
            Ok(diff) => {
                change.lines_added = diff.lines_added;
                change.lines_deleted = diff.lines_deleted;
                if self.options.include_patch {
                    change.patch_text = diff.patch;
                }
            }
            Err(e) => warn!(
                path = change.sort_path(),
                error = %e,
                "content diff unavailable; reporting zero line counts"
            ),
        }
        change
    }
}
