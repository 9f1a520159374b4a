use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::ObjectId;

/// Which side of a tree comparison an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeSide {
    Old,
    New,
}

impl fmt::Display for TreeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeSide::Old => f.write_str("old"),
            TreeSide::New => f.write_str("new"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// The object store could not be opened (e.g. the directory is not a repository).
    #[error("object store unavailable at {}: {reason}", path.display())]
    StoreUnavailable { path: PathBuf, reason: String },

    /// A snapshot id given to the tree diff does not resolve to a tree.
    #[error("{side} snapshot {id} not found in object store")]
    NotFound { side: TreeSide, id: ObjectId },

    /// An object lookup inside the store failed; the tree diff reports it as `NotFound`.
    #[error("object {0} missing from object store")]
    ObjectMissing(ObjectId),

    /// A required input file is missing or unreadable.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("object store error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
