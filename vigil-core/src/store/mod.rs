//! Object Store Adapter.
//!
//! [`ObjectStore`] is the content-addressing seam every engine works through:
//! read/write tree objects, read blobs, diff blob contents. [`Stage`] is the
//! staging side of the same store, used only by the snapshot engine. The agent
//! binary implements both over a git repository; [`MemoryStore`] implements them
//! in memory for tests.

pub mod memory;

pub use memory::MemoryStore;

use crate::content::{self, ContentDiff};
use crate::error::Result;
use crate::types::{ObjectId, SnapshotId, TreeEntry};

/// A blob together with the path it is known by, used to label patches.
#[derive(Debug, Clone, Copy)]
pub struct BlobRef<'a> {
    pub path: &'a str,
    pub id: &'a ObjectId,
}

impl<'a> BlobRef<'a> {
    pub fn of(entry: &'a TreeEntry) -> Self {
        Self { path: &entry.path, id: &entry.id }
    }
}

pub trait ObjectStore {
    /// Returns the flattened, path-sorted entries of a stored tree.
    ///
    /// Fails with [`Error::ObjectMissing`](crate::Error::ObjectMissing) when `id`
    /// is unknown to the store.
    fn read_tree(&self, id: &SnapshotId) -> Result<Vec<TreeEntry>>;

    /// Persists a tree built from flat path entries and returns its id.
    ///
    /// Deterministic: the same entry set always yields the same id, whatever the
    /// input order. The tree is durable before the id is returned.
    fn write_tree(&self, entries: &[TreeEntry]) -> Result<SnapshotId>;

    fn read_blob(&self, id: &ObjectId) -> Result<Vec<u8>>;

    /// Line-diffs two blobs; a `None` side is empty content.
    fn diff_content(&self, old: Option<BlobRef<'_>>, new: Option<BlobRef<'_>>) -> Result<ContentDiff> {
        let old_bytes = match old {
            Some(blob) => self.read_blob(blob.id)?,
            None => Vec::new(),
        };
        let new_bytes = match new {
            Some(blob) => self.read_blob(blob.id)?,
            None => Vec::new(),
        };
        Ok(content::diff_bytes(
            &old_bytes,
            &new_bytes,
            old.map(|b| b.path),
            new.map(|b| b.path),
        ))
    }

    /// Similarity ratio of two blobs, used to pair deletions with insertions.
    fn similarity(&self, old: &ObjectId, new: &ObjectId) -> Result<f32> {
        if old == new {
            return Ok(1.0);
        }
        let old_bytes = self.read_blob(old)?;
        let new_bytes = self.read_blob(new)?;
        Ok(content::similarity(&old_bytes, &new_bytes))
    }
}

/// Counts of index changes made by one [`Stage::stage_all`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageStats {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
}

impl StageStats {
    pub fn is_clean(&self) -> bool {
        self.added == 0 && self.modified == 0 && self.deleted == 0
    }
}

/// Index contents after staging, in path order.
#[derive(Debug, Clone, Default)]
pub struct StagedIndex {
    pub entries: Vec<TreeEntry>,
    pub stats: StageStats,
}

pub trait Stage {
    /// Stages every working-directory change (adds, modifications, deletions)
    /// and returns the resulting index entries.
    fn stage_all(&self) -> Result<StagedIndex>;
}
