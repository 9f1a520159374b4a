//! git2-backed [`ObjectStore`] and [`Stage`].
//!
//! Staging works on the repository index re-read from disk each time and is never
//! written back: the user's index, HEAD and branches are left exactly as they were.

use std::collections::HashMap;
use std::path::Path;

use git2::{
    ErrorCode, Index, IndexAddOption, IndexEntry, IndexMatchedPath, IndexTime, ObjectType, Oid,
    Patch, Repository, TreeWalkMode, TreeWalkResult,
};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info};
use vigil_core::content::{self, ContentDiff};
use vigil_core::store::{BlobRef, ObjectStore, Stage, StageStats, StagedIndex};
use vigil_core::{Error, FileMode, ObjectId, Result, SnapshotId, TreeEntry};

use crate::paths::CONTROL_DIR;

/// Paths kept out of every snapshot: the control directory plus configured globs.
#[derive(Debug, Clone)]
pub struct Exclusions {
    globs: GlobSet,
}

impl Exclusions {
    pub fn new(patterns: &[String]) -> anyhow::Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self { globs: builder.build()? })
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        let control = path == CONTROL_DIR
            || path.strip_prefix(CONTROL_DIR).is_some_and(|rest| rest.starts_with('/'));
        control || self.globs.is_match(path)
    }
}

impl Default for Exclusions {
    fn default() -> Self {
        Self { globs: GlobSet::empty() }
    }
}

pub struct GitStore {
    repo: Repository,
    exclusions: Exclusions,
}

fn backend(e: git2::Error) -> Error {
    Error::Backend(e.message().to_owned())
}

fn to_oid(id: &ObjectId) -> Result<Oid> {
    Oid::from_bytes(id.as_bytes()).map_err(backend)
}

fn from_oid(oid: Oid) -> Result<ObjectId> {
    ObjectId::from_bytes(oid.as_bytes())
        .ok_or_else(|| Error::Backend(format!("unexpected object id length for {oid}")))
}

fn lookup_error(id: &ObjectId, e: git2::Error) -> Error {
    if e.code() == ErrorCode::NotFound {
        Error::ObjectMissing(*id)
    } else {
        backend(e)
    }
}

/// Index stage bits; only stage 0 (merged) entries make it into a snapshot.
fn index_stage(entry: &IndexEntry) -> u16 {
    (entry.flags >> 12) & 0x3
}

impl GitStore {
    /// Opens the repository at `path`. The path must be a repository work tree root.
    pub fn open(path: &Path, exclusions: Exclusions) -> Result<Self> {
        let repo = Repository::open(path).map_err(|e| Error::StoreUnavailable {
            path: path.to_path_buf(),
            reason: e.message().to_owned(),
        })?;
        if repo.is_bare() {
            return Err(Error::StoreUnavailable {
                path: path.to_path_buf(),
                reason: "repository has no working directory".to_owned(),
            });
        }
        Ok(Self { repo, exclusions })
    }

    /// Initialises a repository at `path` unless one already exists there.
    /// Returns whether a new repository was created.
    pub fn ensure_repository(path: &Path) -> Result<bool> {
        match Repository::open(path) {
            Ok(_) => Ok(false),
            Err(e) if e.code() == ErrorCode::NotFound => {
                Repository::init(path).map_err(|e| Error::StoreUnavailable {
                    path: path.to_path_buf(),
                    reason: e.message().to_owned(),
                })?;
                info!(path = %path.display(), "initialised git repository");
                Ok(true)
            }
            Err(e) => Err(Error::StoreUnavailable {
                path: path.to_path_buf(),
                reason: e.message().to_owned(),
            }),
        }
    }

    fn snapshot_entries(&self, index: &Index) -> Vec<TreeEntry> {
        let mut entries = Vec::with_capacity(index.len());
        for entry in index.iter() {
            if index_stage(&entry) != 0 {
                continue;
            }
            let path = String::from_utf8_lossy(&entry.path).into_owned();
            if self.exclusions.is_excluded(&path) {
                continue;
            }
            if let Some(id) = ObjectId::from_bytes(entry.id.as_bytes()) {
                entries.push(TreeEntry::new(path, FileMode::from_bits(entry.mode), id));
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }
}

impl ObjectStore for GitStore {
    fn read_tree(&self, id: &SnapshotId) -> Result<Vec<TreeEntry>> {
        let tree = self.repo.find_tree(to_oid(id)?).map_err(|e| lookup_error(id, e))?;

        let mut entries = Vec::new();
        let mut bad_id = None;
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Tree) {
                return TreeWalkResult::Ok;
            }
            let Some(id) = ObjectId::from_bytes(entry.id().as_bytes()) else {
                bad_id = Some(entry.id());
                return TreeWalkResult::Abort;
            };
            let name = String::from_utf8_lossy(entry.name_bytes());
            entries.push(TreeEntry::new(
                format!("{root}{name}"),
                FileMode::from_bits(entry.filemode() as u32),
                id,
            ));
            TreeWalkResult::Ok
        })
        .map_err(backend)?;
        if let Some(oid) = bad_id {
            return Err(Error::Backend(format!("unexpected object id length for {oid}")));
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn write_tree(&self, entries: &[TreeEntry]) -> Result<SnapshotId> {
        let mut index = Index::new().map_err(backend)?;
        for entry in entries {
            let path = entry.path.as_bytes().to_vec();
            let flags = path.len().min(0xfff) as u16;
            index
                .add(&IndexEntry {
                    ctime: IndexTime::new(0, 0),
                    mtime: IndexTime::new(0, 0),
                    dev: 0,
                    ino: 0,
                    mode: entry.mode.bits(),
                    uid: 0,
                    gid: 0,
                    file_size: 0,
                    id: to_oid(&entry.id)?,
                    flags,
                    flags_extended: 0,
                    path,
                })
                .map_err(backend)?;
        }
        let oid = index.write_tree_to(&self.repo).map_err(backend)?;
        from_oid(oid)
    }

    fn read_blob(&self, id: &ObjectId) -> Result<Vec<u8>> {
        let blob = self.repo.find_blob(to_oid(id)?).map_err(|e| lookup_error(id, e))?;
        Ok(blob.content().to_vec())
    }

    fn diff_content(&self, old: Option<BlobRef<'_>>, new: Option<BlobRef<'_>>) -> Result<ContentDiff> {
        if let (Some(o), Some(n)) = (old, new) {
            if o.id == n.id {
                return Ok(ContentDiff::default());
            }
        }
        let old_blob = old
            .map(|b| self.repo.find_blob(to_oid(b.id)?).map_err(|e| lookup_error(b.id, e)))
            .transpose()?;
        let new_blob = new
            .map(|b| self.repo.find_blob(to_oid(b.id)?).map_err(|e| lookup_error(b.id, e)))
            .transpose()?;

        let binary = [&old_blob, &new_blob]
            .into_iter()
            .flatten()
            .any(|blob| content::is_binary(blob.content()));
        if binary {
            return Ok(ContentDiff::default());
        }

        // libgit2 needs a blob on both sides; inserts and deletes diff against /dev/null.
        let (old_blob, new_blob) = match (old_blob, new_blob) {
            (Some(o), Some(n)) => (o, n),
            (o, n) => {
                return Ok(content::diff_bytes(
                    o.as_ref().map_or(&[][..], |b| b.content()),
                    n.as_ref().map_or(&[][..], |b| b.content()),
                    old.map(|b| b.path),
                    new.map(|b| b.path),
                ));
            }
        };

        let mut opts = git2::DiffOptions::new();
        opts.context_lines(content::CONTEXT_LINES as u32);
        let mut patch = Patch::from_blobs(
            &old_blob,
            old.map(|b| Path::new(b.path)),
            &new_blob,
            new.map(|b| Path::new(b.path)),
            Some(&mut opts),
        )
        .map_err(backend)?;

        let (_, lines_added, lines_deleted) = patch.line_stats().map_err(backend)?;
        let buf = patch.to_buf().map_err(backend)?;
        let text = String::from_utf8_lossy(&buf).into_owned();
        Ok(ContentDiff {
            lines_added,
            lines_deleted,
            patch: (!text.is_empty()).then_some(text),
        })
    }
}

impl Stage for GitStore {
    fn stage_all(&self) -> Result<StagedIndex> {
        let mut index = self.repo.index().map_err(backend)?;
        index.read(true).map_err(backend)?;

        let before: HashMap<String, (u32, Oid)> = index
            .iter()
            .filter(|e| index_stage(e) == 0)
            .map(|e| (String::from_utf8_lossy(&e.path).into_owned(), (e.mode, e.id)))
            .collect();

        let exclusions = &self.exclusions;
        let mut skip_excluded = |path: &Path, _spec: &[u8]| -> i32 {
            if exclusions.is_excluded(&path.to_string_lossy()) {
                1
            } else {
                0
            }
        };
        index
            .add_all(
                ["*"],
                IndexAddOption::DEFAULT,
                Some(&mut skip_excluded as &mut IndexMatchedPath),
            )
            .map_err(backend)?;
        index
            .update_all(["*"], Some(&mut skip_excluded as &mut IndexMatchedPath))
            .map_err(backend)?;

        let entries = self.snapshot_entries(&index);
        let mut stats = StageStats::default();
        let mut seen = 0;
        for entry in &entries {
            match before.get(&entry.path) {
                None => stats.added += 1,
                Some(&(mode, id)) => {
                    seen += 1;
                    if mode != entry.mode.bits() || id.as_bytes() != entry.id.as_bytes() {
                        stats.modified += 1;
                    }
                }
            }
        }
        let excluded_before = before.keys().filter(|p| exclusions.is_excluded(p)).count();
        stats.deleted = before.len() - excluded_before - seen;

        debug!(entries = entries.len(), "working directory staged into private index");
        Ok(StagedIndex { entries, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_dir_is_always_excluded() {
        let ex = Exclusions::new(&["target/**".to_owned(), "*.log".to_owned()]).unwrap();
        assert!(ex.is_excluded(".vigil"));
        assert!(ex.is_excluded(".vigil/state.log"));
        assert!(!ex.is_excluded(".vigilant/notes.md"));
        assert!(ex.is_excluded("target/debug/app"));
        assert!(ex.is_excluded("build.log"));
        assert!(!ex.is_excluded("src/main.rs"));
    }

    #[test]
    fn bad_glob_is_rejected() {
        assert!(Exclusions::new(&["a[".to_owned()]).is_err());
    }

    #[test]
    fn open_outside_a_repository_is_store_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let err = GitStore::open(tmp.path(), Exclusions::default()).err().unwrap();
        assert!(matches!(err, Error::StoreUnavailable { .. }));
    }
}
