use crate::domain::model::EntryKind;
use crate::utils::error::Result;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::time::Duration;

const HASH_CHUNK: usize = 4096;

/// Lowercase hex md5 of a file, read in fixed-size chunks.
pub fn file_md5(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut context = md5::Context::new();
    let mut buf = [0u8; HASH_CHUNK];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
    }
    Ok(format!("{:x}", context.compute()))
}

pub async fn file_md5_async(path: &Path) -> std::io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || file_md5(&path))
        .await
        .map_err(std::io::Error::other)?
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub hash: String,
}

impl SnapshotEntry {
    pub fn line(&self) -> String {
        format!("{},{},{},{}", self.path, self.kind, self.size, self.hash)
    }
}

/// Content fingerprint of a directory tree: one `path,type,size,hash` line per
/// entry, sorted. Directories have size 0 and hash `0`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TreeSnapshot {
    lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SnapshotDiff {
    pub only_left: Vec<String>,
    pub only_right: Vec<String>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.only_left.is_empty() && self.only_right.is_empty()
    }
}

impl TreeSnapshot {
    pub fn capture(root: &Path) -> Result<Self> {
        let mut entries = Vec::new();
        walk(root, root, &mut entries)?;
        let mut lines: Vec<String> = entries.iter().map(SnapshotEntry::line).collect();
        lines.sort();
        Ok(Self { lines })
    }

    pub async fn capture_async(root: &Path) -> Result<Self> {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || Self::capture(&root))
            .await
            .map_err(std::io::Error::other)?
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }

    pub fn diff(&self, other: &TreeSnapshot) -> SnapshotDiff {
        let only_left = self
            .lines
            .iter()
            .filter(|l| other.lines.binary_search(l).is_err())
            .cloned()
            .collect();
        let only_right = other
            .lines
            .iter()
            .filter(|l| self.lines.binary_search(l).is_err())
            .cloned()
            .collect();
        SnapshotDiff {
            only_left,
            only_right,
        }
    }
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<SnapshotEntry>) -> Result<()> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        // The tree may change while it is being captured
        Err(e) if e.kind() == ErrorKind::NotFound && dir != root => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    for entry in read_dir {
        let entry = entry?;
        let path = entry.path();
        let linked = entry.file_type()?.is_symlink();
        // Symlinks are described by their target but never walked through
        let meta = match std::fs::metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        let relative = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/");

        if meta.is_dir() {
            out.push(SnapshotEntry {
                path: relative,
                kind: EntryKind::Dir,
                size: 0,
                hash: "0".to_string(),
            });
            if !linked {
                walk(root, &path, out)?;
            }
        } else {
            let hash = match file_md5(&path) {
                Ok(hash) => hash,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            out.push(SnapshotEntry {
                path: relative,
                kind: EntryKind::File,
                size: meta.len(),
                hash,
            });
        }
    }
    Ok(())
}

/// Polls both trees until they match or `timeout` runs out. Always compares at
/// least once. Returns the last difference seen.
pub async fn wait_until_in_sync(
    left: &Path,
    right: &Path,
    timeout: Duration,
    step: Duration,
) -> Result<SnapshotDiff> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let a = TreeSnapshot::capture_async(left).await?;
        let b = TreeSnapshot::capture_async(right).await?;
        let diff = a.diff(&b);
        if diff.is_empty() || tokio::time::Instant::now() + step > deadline {
            return Ok(diff);
        }
        tokio::time::sleep(step).await;
    }
}
