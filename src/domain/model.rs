use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Dir => "dir",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// A filesystem change reported by the watcher, with absolute paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
    RenamedFrom(PathBuf),
    RenamedTo(PathBuf),
    /// The watcher lost events; the whole tree must be reconciled.
    Rescan,
}

/// A planned remote mutation. Paths are relative to the sync root and use `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOp {
    Upload(String),
    Remove(String),
    Rename { from: String, to: String },
}

impl SyncOp {
    pub fn touches(&self, path: &str) -> bool {
        match self {
            SyncOp::Upload(p) | SyncOp::Remove(p) => p == path,
            SyncOp::Rename { from, to } => from == path || to == path,
        }
    }
}

impl fmt::Display for SyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOp::Upload(p) => write!(f, "upload {}", p),
            SyncOp::Remove(p) => write!(f, "remove {}", p),
            SyncOp::Rename { from, to } => write!(f, "rename {} -> {}", from, to),
        }
    }
}
