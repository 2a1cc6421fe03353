use crate::domain::model::{EntryKind, RemoteEntry};
use chrono::{DateTime, Utc};
use std::path::Path;

/// A local directory entry. Symlinks are classified by their target and
/// flagged so tree walks can decline to descend through them.
#[derive(Debug, Clone)]
pub struct LocalEntry {
    pub entry: RemoteEntry,
    pub linked: bool,
}

/// Lists a directory, sorted by name. Dangling symlinks and anything that is
/// neither file nor directory are skipped.
pub async fn list_local_entries(dir: &Path) -> std::io::Result<Vec<LocalEntry>> {
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let linked = entry.file_type().await?.is_symlink();
        let meta = if linked {
            tokio::fs::metadata(entry.path()).await
        } else {
            entry.metadata().await
        };
        let Ok(meta) = meta else {
            continue;
        };
        let kind = if meta.is_dir() {
            EntryKind::Dir
        } else if meta.is_file() {
            EntryKind::File
        } else {
            continue;
        };
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!("Skipping non UTF-8 file name in {}", dir.display());
            continue;
        };
        entries.push(LocalEntry {
            entry: RemoteEntry {
                name,
                kind,
                size: if kind == EntryKind::Dir { 0 } else { meta.len() },
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
            },
            linked,
        });
    }
    entries.sort_by(|a, b| a.entry.name.cmp(&b.entry.name));
    Ok(entries)
}

/// [`list_local_entries`] without the symlink flag, as served in listings.
pub async fn list_entries(dir: &Path) -> std::io::Result<Vec<RemoteEntry>> {
    let entries = list_local_entries(dir).await?;
    Ok(entries.into_iter().map(|local| local.entry).collect())
}

/// Joins a `/`-separated relative path onto a root.
pub fn join_relative(root: &Path, relative: &str) -> std::path::PathBuf {
    relative
        .split('/')
        .filter(|c| !c.is_empty())
        .fold(root.to_path_buf(), |acc, c| acc.join(c))
}

/// Inverse of [`join_relative`]: `None` for paths outside `root` or not UTF-8.
pub fn relative_to(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts = rel
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}
