use crate::domain::model::Change;
use crate::utils::error::Result;
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

/// Recursive watcher that hands out debounced batches of [`Change`]s.
pub struct FsWatcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    rx: mpsc::UnboundedReceiver<DebounceEventResult>,
}

impl FsWatcher {
    /// Events settle for `debounce` before they are handed out; the debouncer
    /// pairs rename halves by file id.
    pub fn start(root: &Path, debounce: Duration) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut debouncer = new_debouncer(debounce, None, move |res: DebounceEventResult| {
            // Receiver gone means the engine is shutting down
            let _ = tx.send(res);
        })?;
        debouncer.watch(root, RecursiveMode::Recursive)?;
        tracing::info!("Watching {}", root.display());

        Ok(Self {
            _debouncer: debouncer,
            rx,
        })
    }

    /// Next non-empty batch of changes, or `None` once the watcher is gone.
    /// Cancel-safe.
    pub async fn next_batch(&mut self) -> Option<Vec<Change>> {
        loop {
            let changes: Vec<Change> = match self.rx.recv().await? {
                Ok(events) => events.into_iter().flat_map(|e| translate(e.event)).collect(),
                Err(errors) => {
                    for e in &errors {
                        tracing::warn!("Watcher error, scheduling full rescan: {}", e);
                    }
                    vec![Change::Rescan]
                }
            };
            if !changes.is_empty() {
                return Some(changes);
            }
        }
    }
}

/// Maps a raw notify event onto zero or more changes.
pub fn translate(event: Event) -> Vec<Change> {
    if event.need_rescan() {
        return vec![Change::Rescan];
    }

    let Event { kind, paths, .. } = event;
    match kind {
        EventKind::Create(_) => paths.into_iter().map(Change::Created).collect(),
        EventKind::Remove(_) => paths.into_iter().map(Change::Removed).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match (mode, paths.as_slice()) {
            (RenameMode::Both, [from, to]) => vec![Change::Renamed {
                from: from.clone(),
                to: to.clone(),
            }],
            (RenameMode::From, _) => paths.into_iter().map(Change::RenamedFrom).collect(),
            (RenameMode::To, _) => paths.into_iter().map(Change::RenamedTo).collect(),
            // Backends that cannot tell the direction: decide by existence
            _ => paths
                .into_iter()
                .map(|p| {
                    if p.exists() {
                        Change::RenamedTo(p)
                    } else {
                        Change::RenamedFrom(p)
                    }
                })
                .collect(),
        },
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => paths.into_iter().map(Change::Modified).collect(),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
            paths.into_iter().map(Change::Modified).collect()
        }
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::path::PathBuf;

    #[test]
    fn test_translate_basic_kinds() {
        let created = Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/r/a"));
        assert_eq!(translate(created), vec![Change::Created(PathBuf::from("/r/a"))]);

        let written = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/r/a"));
        assert_eq!(translate(written), vec![Change::Modified(PathBuf::from("/r/a"))]);

        let removed = Event::new(EventKind::Remove(RemoveKind::Folder)).add_path(PathBuf::from("/r/d"));
        assert_eq!(translate(removed), vec![Change::Removed(PathBuf::from("/r/d"))]);

        let read = Event::new(EventKind::Access(AccessKind::Read)).add_path(PathBuf::from("/r/a"));
        assert!(translate(read).is_empty());
    }

    #[test]
    fn test_translate_renames() {
        let both = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/r/old"))
            .add_path(PathBuf::from("/r/new"));
        assert_eq!(
            translate(both),
            vec![Change::Renamed {
                from: PathBuf::from("/r/old"),
                to: PathBuf::from("/r/new"),
            }]
        );

        let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(PathBuf::from("/r/gone"));
        assert_eq!(translate(from), vec![Change::RenamedFrom(PathBuf::from("/r/gone"))]);
    }

    #[tokio::test]
    async fn test_batches_from_a_live_tree() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let mut watcher = FsWatcher::start(&root, Duration::from_millis(50)).unwrap();

        std::fs::write(root.join("new.txt"), "x").unwrap();
        let batch = tokio::time::timeout(Duration::from_secs(5), watcher.next_batch())
            .await
            .unwrap()
            .unwrap();
        assert!(
            batch.iter().any(|c| matches!(
                c,
                Change::Created(p) | Change::Modified(p) if p == &root.join("new.txt")
            )),
            "unexpected batch {:?}",
            batch
        );
    }

    #[test]
    fn test_translate_rescan_flag() {
        let event = Event::new(EventKind::Other).set_flag(notify::event::Flag::Rescan);
        assert_eq!(translate(event), vec![Change::Rescan]);
    }
}
