//! In-memory object store with a simulated working tree.
//!
//! Objects are framed like git objects (`"<kind> <len>\0<body>"`) and hashed with
//! SHA-256 truncated to 20 bytes, so ids are content-derived and deterministic.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::store::{ObjectStore, Stage, StageStats, StagedIndex};
use crate::types::{FileMode, ObjectId, SnapshotId, TreeEntry};

#[derive(Debug, Clone)]
enum Object {
    Blob(Vec<u8>),
    Tree(Vec<TreeEntry>),
}

#[derive(Debug, Clone)]
struct WorkFile {
    mode: FileMode,
    content: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<ObjectId, Object>>,
    worktree: Mutex<BTreeMap<String, WorkFile>>,
    index: Mutex<BTreeMap<String, TreeEntry>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn hash_object(kind: &str, body: &[u8]) -> ObjectId {
    let mut hasher = Sha256::new();
    hasher.update(format!("{kind} {}\0", body.len()).as_bytes());
    hasher.update(body);
    let digest = hasher.finalize();
    let mut raw = [0u8; ObjectId::LEN];
    raw.copy_from_slice(&digest[..ObjectId::LEN]);
    ObjectId::from_raw(raw)
}

fn encode_tree(entries: &[TreeEntry]) -> Vec<u8> {
    let mut body = Vec::new();
    for entry in entries {
        body.extend_from_slice(format!("{} {}\0", entry.mode, entry.path).as_bytes());
        body.extend_from_slice(entry.id.as_bytes());
    }
    body
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a regular file into the simulated working tree.
    pub fn write_file(&self, path: &str, content: impl Into<Vec<u8>>) {
        self.write_file_with_mode(path, FileMode::REGULAR, content);
    }

    pub fn write_file_with_mode(&self, path: &str, mode: FileMode, content: impl Into<Vec<u8>>) {
        lock(&self.worktree).insert(path.to_owned(), WorkFile { mode, content: content.into() });
    }

    /// Removes a file from the simulated working tree; returns whether it existed.
    pub fn remove_file(&self, path: &str) -> bool {
        lock(&self.worktree).remove(path).is_some()
    }

    /// Stores a blob and returns its id.
    pub fn insert_blob(&self, content: &[u8]) -> ObjectId {
        let id = hash_object("blob", content);
        lock(&self.objects)
            .entry(id)
            .or_insert_with(|| Object::Blob(content.to_vec()));
        id
    }

    pub fn object_count(&self) -> usize {
        lock(&self.objects).len()
    }
}

impl ObjectStore for MemoryStore {
    fn read_tree(&self, id: &SnapshotId) -> Result<Vec<TreeEntry>> {
        match lock(&self.objects).get(id) {
            Some(Object::Tree(entries)) => Ok(entries.clone()),
            Some(Object::Blob(_)) => Err(Error::Backend(format!("object {id} is a blob, not a tree"))),
            None => Err(Error::ObjectMissing(*id)),
        }
    }

    fn write_tree(&self, entries: &[TreeEntry]) -> Result<SnapshotId> {
        let mut sorted = entries.to_vec();
        sorted.sort_by(|a, b| a.path.cmp(&b.path));
        if let Some(pair) = sorted.windows(2).find(|w| w[0].path == w[1].path) {
            return Err(Error::Backend(format!("duplicate tree path {:?}", pair[0].path)));
        }

        let id = hash_object("tree", &encode_tree(&sorted));
        lock(&self.objects).entry(id).or_insert(Object::Tree(sorted));
        Ok(id)
    }

    fn read_blob(&self, id: &ObjectId) -> Result<Vec<u8>> {
        match lock(&self.objects).get(id) {
            Some(Object::Blob(bytes)) => Ok(bytes.clone()),
            Some(Object::Tree(_)) => Err(Error::Backend(format!("object {id} is a tree, not a blob"))),
            None => Err(Error::ObjectMissing(*id)),
        }
    }
}

impl Stage for MemoryStore {
    fn stage_all(&self) -> Result<StagedIndex> {
        let worktree = lock(&self.worktree).clone();
        let mut index = lock(&self.index);
        let mut stats = StageStats::default();

        let removed: Vec<String> = index
            .keys()
            .filter(|path| !worktree.contains_key(*path))
            .cloned()
            .collect();
        for path in removed {
            index.remove(&path);
            stats.deleted += 1;
        }

        for (path, file) in &worktree {
            let id = self.insert_blob(&file.content);
            let entry = TreeEntry::new(path.clone(), file.mode, id);
            match index.get(path) {
                None => stats.added += 1,
                Some(existing) if existing != &entry => stats.modified += 1,
                Some(_) => continue,
            }
            index.insert(path.clone(), entry);
        }

        Ok(StagedIndex { entries: index.values().cloned().collect(), stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_ids_are_order_independent() {
        let store = MemoryStore::new();
        let a = TreeEntry::new("a.txt", FileMode::REGULAR, store.insert_blob(b"a"));
        let b = TreeEntry::new("dir/b.txt", FileMode::REGULAR, store.insert_blob(b"b"));

        let first = store.write_tree(&[a.clone(), b.clone()]).unwrap();
        let second = store.write_tree(&[b, a]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn read_tree_returns_sorted_entries() {
        let store = MemoryStore::new();
        let z = TreeEntry::new("z", FileMode::REGULAR, store.insert_blob(b"z"));
        let a = TreeEntry::new("a", FileMode::EXECUTABLE, store.insert_blob(b"a"));
        let id = store.write_tree(&[z.clone(), a.clone()]).unwrap();
        assert_eq!(store.read_tree(&id).unwrap(), vec![a, z]);
    }

    #[test]
    fn unknown_ids_are_missing() {
        let store = MemoryStore::new();
        let bogus = ObjectId::from_raw([7; ObjectId::LEN]);
        assert!(matches!(store.read_tree(&bogus), Err(Error::ObjectMissing(id)) if id == bogus));
        assert!(matches!(store.read_blob(&bogus), Err(Error::ObjectMissing(_))));
    }

    #[test]
    fn duplicate_paths_are_rejected() {
        let store = MemoryStore::new();
        let id = store.insert_blob(b"x");
        let entry = TreeEntry::new("same", FileMode::REGULAR, id);
        assert!(store.write_tree(&[entry.clone(), entry]).is_err());
    }

    #[test]
    fn stage_all_records_adds_modifies_and_deletes() {
        let store = MemoryStore::new();
        store.write_file("keep.txt", "keep");
        store.write_file("edit.txt", "v1");
        store.write_file("gone.txt", "bye");

        let first = store.stage_all().unwrap();
        assert_eq!(first.stats, StageStats { added: 3, modified: 0, deleted: 0 });

        store.write_file("edit.txt", "v2");
        store.remove_file("gone.txt");
        store.write_file("new.txt", "hi");
        let second = store.stage_all().unwrap();
        assert_eq!(second.stats, StageStats { added: 1, modified: 1, deleted: 1 });

        let paths: Vec<&str> = second.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["edit.txt", "keep.txt", "new.txt"]);

        let third = store.stage_all().unwrap();
        assert!(third.stats.is_clean());
    }
}
