use crate::core::planner::Planner;
use crate::core::snapshot::file_md5_async;
use crate::core::watcher::FsWatcher;
use crate::domain::model::{EntryKind, RemoteEntry, SyncOp};
use crate::domain::ports::{ClientSettingsProvider, RemoteStore};
use crate::utils::error::{Result, SyncError};
use crate::utils::fs::{join_relative, list_local_entries, LocalEntry};
use crate::utils::pattern::IgnoreSet;
use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

/// Uploads refused with a transient (4xx) reply are tried this many times.
const TRANSIENT_UPLOAD_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub dirs_created: usize,
    pub files_uploaded: usize,
    pub files_unchanged: usize,
    pub entries_removed: usize,
    pub renames: usize,
}

/// Keeps a remote store identical to a local directory tree.
pub struct SyncEngine<S: RemoteStore, C: ClientSettingsProvider> {
    store: S,
    settings: C,
    root: PathBuf,
    planner: Planner,
    stats: SyncStats,
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Keeps a reconcile going past single-entry failures.
fn guard<T>(path: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_transport() => Err(e),
        Err(e) => {
            tracing::warn!("Skipping {}: {}", path, e);
            Ok(None)
        }
    }
}

fn split_parent(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

impl<S: RemoteStore, C: ClientSettingsProvider> SyncEngine<S, C> {
    pub fn new(store: S, settings: C) -> Result<Self> {
        let root = settings.local_root().canonicalize()?;
        let ignore = IgnoreSet::new(settings.ignore_patterns())?;
        Ok(Self {
            store,
            settings,
            planner: Planner::new(root.clone(), ignore),
            root,
            stats: SyncStats::default(),
        })
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Makes the whole remote tree identical to the local one.
    pub async fn initial_sync(&mut self) -> Result<SyncStats> {
        let before = self.stats;
        tracing::info!("Reconciling {} with the remote", self.root.display());
        self.sync_dir("").await?;
        let after = self.stats;
        let delta = SyncStats {
            dirs_created: after.dirs_created - before.dirs_created,
            files_uploaded: after.files_uploaded - before.files_uploaded,
            files_unchanged: after.files_unchanged - before.files_unchanged,
            entries_removed: after.entries_removed - before.entries_removed,
            renames: after.renames - before.renames,
        };
        tracing::info!(
            "Reconciled: {} dirs created, {} files uploaded, {} unchanged, {} removed",
            delta.dirs_created,
            delta.files_uploaded,
            delta.files_unchanged,
            delta.entries_removed
        );
        Ok(delta)
    }

    /// Applies ops in order. Per-op failures are logged and skipped; a
    /// transport failure aborts the batch.
    pub async fn apply_all(&mut self, ops: Vec<SyncOp>) -> Result<()> {
        for op in ops {
            tracing::debug!("Applying {}", op);
            if let Err(e) = self.apply(&op).await {
                if e.is_transport() {
                    return Err(e);
                }
                tracing::warn!("Failed to {}: {}", op, e);
            }
        }
        Ok(())
    }

    pub async fn apply(&mut self, op: &SyncOp) -> Result<()> {
        match op {
            SyncOp::Upload(path) | SyncOp::Remove(path) => self.sync_path(path).await,
            SyncOp::Rename { from, to } => self.rename(from, to).await,
        }
    }

    /// Brings one remote path in line with whatever is at that path locally now.
    async fn sync_path(&mut self, path: &str) -> Result<()> {
        if path.is_empty() {
            return self.sync_dir("").await;
        }
        let local = join_relative(&self.root, path);
        match tokio::fs::metadata(&local).await {
            Ok(meta) if meta.is_dir() => self.sync_dir(path).await,
            Ok(_) => self.upload_file(path).await,
            Err(e) if e.kind() == ErrorKind::NotFound => self.remove_remote_if_present(path).await,
            Err(e) => Err(e.into()),
        }
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let from_local = join_relative(&self.root, from);
        let to_local = join_relative(&self.root, to);
        if from_local.exists() || !to_local.exists() {
            // Superseded by later changes; converge both ends instead
            self.sync_path(from).await?;
            return self.sync_path(to).await;
        }

        match self.store.rename(from, to).await {
            Ok(()) => {
                self.stats.renames += 1;
                tracing::info!("Renamed {} -> {}", from, to);
                Ok(())
            }
            Err(e) if e.is_transport() => Err(e),
            Err(e) => {
                tracing::info!("Remote rename {} -> {} failed ({}); re-syncing both paths", from, to, e);
                self.sync_path(from).await?;
                self.sync_path(to).await
            }
        }
    }

    async fn upload_file(&mut self, path: &str) -> Result<()> {
        let local = join_relative(&self.root, path);
        let mut attempt = 1;
        loop {
            let err = match self.store.upload(path, &local).await {
                Ok(()) => break,
                Err(e) if e.is_transport() => return Err(e),
                Err(e) => e,
            };
            if !tokio::fs::try_exists(&local).await.unwrap_or(false) {
                // Vanished between the event and the upload
                return self.remove_remote_if_present(path).await;
            }

            if err.is_transient_reply() {
                if attempt >= TRANSIENT_UPLOAD_ATTEMPTS {
                    return Err(err);
                }
                tracing::debug!("Upload of {} refused ({}); retrying", path, err);
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(self.settings.reconnect_delay_ms())).await;
                continue;
            }

            if !(err.is_permanent_reply() || matches!(err, SyncError::IoError(_))) {
                return Err(err);
            }
            tracing::debug!("Upload of {} failed ({}); repairing remote path", path, err);
            match self.remote_kind(path).await? {
                Some(EntryKind::Dir) => self.remove_remote(path, EntryKind::Dir).await?,
                Some(EntryKind::File) => return Err(err),
                None => self.ensure_parents(path).await?,
            }
            self.store.upload(path, &local).await?;
            break;
        }
        self.stats.files_uploaded += 1;
        tracing::info!("Uploaded {}", path);
        Ok(())
    }

    /// Finds the kind of a remote entry through its parent's listing.
    async fn remote_kind(&mut self, path: &str) -> Result<Option<EntryKind>> {
        let (parent, name) = split_parent(path);
        match self.store.list_dir(parent).await {
            Ok(entries) => Ok(entries.into_iter().find(|e| e.name == name).map(|e| e.kind)),
            Err(e) if e.is_transport() => Err(e),
            Err(_) => Ok(None),
        }
    }

    async fn ensure_parents(&mut self, path: &str) -> Result<()> {
        let mut prefix = String::new();
        let components: Vec<&str> = path.split('/').collect();
        for component in &components[..components.len().saturating_sub(1)] {
            prefix = join(&prefix, component);
            match self.store.make_dir(&prefix).await {
                Ok(()) => self.stats.dirs_created += 1,
                Err(e) if e.is_transport() => return Err(e),
                // Most likely it already exists
                Err(_) => {}
            }
        }
        Ok(())
    }

    async fn remove_remote_if_present(&mut self, path: &str) -> Result<()> {
        match self.remote_kind(path).await? {
            Some(kind) => self.remove_remote(path, kind).await,
            None => Ok(()),
        }
    }

    /// Removes a remote file, or a remote directory with everything below it.
    async fn remove_remote(&mut self, path: &str, kind: EntryKind) -> Result<()> {
        if kind == EntryKind::File {
            self.store.remove_file(path).await?;
            self.stats.entries_removed += 1;
            tracing::info!("Removed {}", path);
            return Ok(());
        }

        let mut pending = vec![path.to_string()];
        let mut dirs = Vec::new();
        while let Some(dir) = pending.pop() {
            for entry in self.store.list_dir(&dir).await? {
                let child = join(&dir, &entry.name);
                match entry.kind {
                    EntryKind::Dir => pending.push(child),
                    EntryKind::File => {
                        self.store.remove_file(&child).await?;
                        self.stats.entries_removed += 1;
                    }
                }
            }
            dirs.push(dir);
        }
        // Parents were discovered before their children
        for dir in dirs.iter().rev() {
            self.store.remove_dir(dir).await?;
            self.stats.entries_removed += 1;
        }
        tracing::info!("Removed {} (directory)", path);
        Ok(())
    }

    /// Reconciles the subtree at `path` (the whole tree for `""`). A symlinked
    /// directory is mirrored as an empty directory; its target is not walked.
    async fn sync_dir(&mut self, path: &str) -> Result<()> {
        let mut linked = false;
        if !path.is_empty() {
            linked = tokio::fs::symlink_metadata(join_relative(&self.root, path))
                .await
                .map(|meta| meta.file_type().is_symlink())
                .unwrap_or(false);
            match self.remote_kind(path).await? {
                Some(EntryKind::Dir) => {}
                Some(EntryKind::File) => {
                    self.remove_remote(path, EntryKind::File).await?;
                    self.create_remote_dir(path).await?;
                }
                None => {
                    self.ensure_parents(path).await?;
                    self.create_remote_dir(path).await?;
                }
            }
        }

        let mut pending = vec![(path.to_string(), linked)];
        while let Some((dir, linked)) = pending.pop() {
            let local = if linked {
                tracing::debug!("Not descending into symlinked directory {}", dir);
                Vec::new()
            } else {
                match list_local_entries(&join_relative(&self.root, &dir)).await {
                    Ok(entries) => entries,
                    // Removed while we were walking; its own event will follow
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                }
            };
            let remote: HashMap<String, RemoteEntry> = self
                .store
                .list_dir(&dir)
                .await?
                .into_iter()
                .map(|e| (e.name.clone(), e))
                .collect();
            let local_kinds: HashMap<&str, EntryKind> = local
                .iter()
                .map(|l| (l.entry.name.as_str(), l.entry.kind))
                .collect();

            let mut stale: Vec<&RemoteEntry> = remote
                .values()
                .filter(|r| local_kinds.get(r.name.as_str()) != Some(&r.kind))
                .collect();
            stale.sort_by(|a, b| a.name.cmp(&b.name));
            for entry in stale {
                let child = join(&dir, &entry.name);
                if self.planner.is_ignored(&child) {
                    continue;
                }
                let removed = self.remove_remote(&child, entry.kind).await;
                guard(&child, removed)?;
            }

            for LocalEntry { entry, linked } in &local {
                let child = join(&dir, &entry.name);
                if self.planner.is_ignored(&child) {
                    continue;
                }
                let existing = remote.get(&entry.name).filter(|r| r.kind == entry.kind);
                match entry.kind {
                    EntryKind::Dir => {
                        if existing.is_none() {
                            let created = self.create_remote_dir(&child).await;
                            if guard(&child, created)?.is_none() {
                                continue;
                            }
                        }
                        pending.push((child, *linked));
                    }
                    EntryKind::File => {
                        let unchanged = match existing {
                            Some(remote) if remote.size == entry.size => {
                                self.same_content(&child).await?
                            }
                            _ => false,
                        };
                        if unchanged {
                            self.stats.files_unchanged += 1;
                        } else {
                            let uploaded = self.upload_file(&child).await;
                            guard(&child, uploaded)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn create_remote_dir(&mut self, path: &str) -> Result<()> {
        self.store.make_dir(path).await?;
        self.stats.dirs_created += 1;
        tracing::info!("Created directory {}", path);
        Ok(())
    }

    async fn same_content(&mut self, path: &str) -> Result<bool> {
        let remote = match self.store.checksum(path).await {
            Ok(Some(hash)) => hash,
            // No way to compare; size already matched
            Ok(None) => return Ok(true),
            Err(e) if e.is_transport() => return Err(e),
            Err(_) => return Ok(false),
        };
        match file_md5_async(&join_relative(&self.root, path)).await {
            Ok(local) => Ok(local == remote),
            Err(_) => Ok(false),
        }
    }

    /// Reconnects after a transport error and runs a full reconcile. Gives up
    /// after the configured number of attempts.
    async fn recover(&mut self, error: SyncError) -> Result<()> {
        if !error.is_transport() {
            tracing::warn!("Sync step failed: {}", error);
            return Ok(());
        }

        tracing::warn!("Lost connection to the remote: {}", error);
        let attempts = self.settings.reconnect_attempts();
        let delay = Duration::from_millis(self.settings.reconnect_delay_ms());
        let mut last = error;
        for attempt in 1..=attempts {
            tokio::time::sleep(delay).await;
            tracing::info!("Reconnecting (attempt {}/{})", attempt, attempts);
            if let Err(e) = self.store.reconnect().await {
                tracing::warn!("Reconnect failed: {}", e);
                last = e;
                continue;
            }
            match self.initial_sync().await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_transport() => last = e,
                Err(e) => return Err(e),
            }
        }
        Err(SyncError::SyncFailed {
            message: format!("giving up after {} reconnect attempts: {}", attempts, last),
        })
    }

    /// Initial sync, then replays local changes until `shutdown` resolves.
    pub async fn run<F>(mut self, shutdown: F) -> Result<SyncStats>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        // Watch first so nothing changed during the initial sync is missed
        let debounce = Duration::from_millis(self.settings.debounce_ms());
        let mut watcher = FsWatcher::start(&self.root, debounce)?;

        if let Err(e) = self.initial_sync().await {
            if !e.is_transport() {
                return Err(e);
            }
            self.recover(e).await?;
        }

        let rescan_every = self.settings.rescan_interval_secs();
        let mut rescan = (rescan_every > 0).then(|| {
            let period = Duration::from_secs(rescan_every);
            tokio::time::interval_at(tokio::time::Instant::now() + period, period)
        });

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutting down sync engine");
                    break;
                }
                batch = watcher.next_batch() => {
                    let Some(changes) = batch else {
                        return Err(SyncError::SyncFailed {
                            message: "file watcher stopped".to_string(),
                        });
                    };
                    let ops = self.planner.plan(changes);
                    if ops.is_empty() {
                        continue;
                    }
                    tracing::debug!("Applying {} ops", ops.len());
                    if let Err(e) = self.apply_all(ops).await {
                        self.recover(e).await?;
                    }
                }
                _ = async {
                    match rescan.as_mut() {
                        Some(interval) => { interval.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    tracing::debug!("Periodic rescan");
                    if let Err(e) = self.sync_dir("").await {
                        self.recover(e).await?;
                    }
                }
            }
        }

        if let Err(e) = self.store.close().await {
            tracing::debug!("Error while closing the remote: {}", e);
        }
        Ok(self.stats)
    }
}
