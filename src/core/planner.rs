use crate::domain::model::{Change, SyncOp};
use crate::utils::fs::relative_to;
use crate::utils::pattern::IgnoreSet;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Turns a batch of watcher changes into an ordered list of remote ops.
#[derive(Debug, Clone)]
pub struct Planner {
    root: PathBuf,
    ignore: IgnoreSet,
}

impl Planner {
    pub fn new(root: impl Into<PathBuf>, ignore: IgnoreSet) -> Self {
        Self {
            root: root.into(),
            ignore,
        }
    }

    pub fn is_ignored(&self, relative: &str) -> bool {
        self.ignore.is_ignored(relative)
    }

    /// Relative path of a synced entry; `None` for the root itself, paths
    /// outside the root and ignored paths.
    fn relative(&self, path: &Path) -> Option<String> {
        relative_to(&self.root, path).filter(|rel| !rel.is_empty() && !self.is_ignored(rel))
    }

    pub fn plan(&self, changes: Vec<Change>) -> Vec<SyncOp> {
        let mut paired_from = HashSet::new();
        let mut paired_to = HashSet::new();
        for change in &changes {
            if let Change::Renamed { from, to } = change {
                paired_from.insert(from.clone());
                paired_to.insert(to.clone());
            }
        }

        let mut ops = Vec::new();
        for change in changes {
            let op = match change {
                Change::Created(path) => self.relative(&path).map(SyncOp::Upload),
                Change::Modified(path) => {
                    if path.is_dir() {
                        None
                    } else {
                        self.relative(&path).map(SyncOp::Upload)
                    }
                }
                Change::Removed(path) => self.relative(&path).map(SyncOp::Remove),
                Change::Renamed { from, to } => match (self.relative(&from), self.relative(&to)) {
                    (Some(from), Some(to)) => Some(SyncOp::Rename { from, to }),
                    (Some(from), None) => Some(SyncOp::Remove(from)),
                    (None, Some(to)) => Some(SyncOp::Upload(to)),
                    (None, None) => None,
                },
                Change::RenamedFrom(path) if !paired_from.contains(&path) => {
                    self.relative(&path).map(SyncOp::Remove)
                }
                Change::RenamedTo(path) if !paired_to.contains(&path) => {
                    self.relative(&path).map(SyncOp::Upload)
                }
                Change::RenamedFrom(_) | Change::RenamedTo(_) => None,
                Change::Rescan => Some(SyncOp::Upload(String::new())),
            };
            if let Some(op) = op {
                push_deduplicated(&mut ops, op);
            }
        }
        ops
    }
}

/// Drops an earlier identical op when nothing in between touches its path.
fn push_deduplicated(ops: &mut Vec<SyncOp>, op: SyncOp) {
    if let SyncOp::Upload(path) | SyncOp::Remove(path) = &op {
        if let Some(index) = ops.iter().rposition(|o| o.touches(path)) {
            if ops[index] == op {
                ops.remove(index);
            }
        }
    }
    ops.push(op);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn planner(root: &Path) -> Planner {
        Planner::new(root, IgnoreSet::new(&["*.swp"]).unwrap())
    }

    #[test]
    fn test_create_and_modify_collapse_to_one_upload() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("newfile.txt");
        std::fs::write(&file, "contents").unwrap();

        let ops = planner(dir.path()).plan(vec![
            Change::Created(file.clone()),
            Change::Modified(file.clone()),
            Change::Modified(file),
        ]);
        assert_eq!(ops, vec![SyncOp::Upload("newfile.txt".to_string())]);
    }

    #[test]
    fn test_intervening_op_keeps_both() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f");

        let ops = planner(dir.path()).plan(vec![
            Change::Created(file.clone()),
            Change::Removed(file.clone()),
            Change::Created(file),
        ]);
        assert_eq!(
            ops,
            vec![
                SyncOp::Upload("f".to_string()),
                SyncOp::Remove("f".to_string()),
                SyncOp::Upload("f".to_string()),
            ]
        );
    }

    #[test]
    fn test_paired_rename_swallows_halves() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("subdirectory1/subdirectory2");
        let to = dir.path().join("subdirectory2");

        let ops = planner(dir.path()).plan(vec![
            Change::RenamedFrom(from.clone()),
            Change::RenamedTo(to.clone()),
            Change::Renamed { from, to },
        ]);
        assert_eq!(
            ops,
            vec![SyncOp::Rename {
                from: "subdirectory1/subdirectory2".to_string(),
                to: "subdirectory2".to_string(),
            }]
        );
    }

    #[test]
    fn test_moves_across_the_root_boundary() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();

        let ops = planner(dir.path()).plan(vec![
            Change::RenamedFrom(dir.path().join("moved_out")),
            Change::RenamedTo(dir.path().join("moved_in")),
            Change::Renamed {
                from: dir.path().join("a"),
                to: outside.path().join("a"),
            },
        ]);
        assert_eq!(
            ops,
            vec![
                SyncOp::Remove("moved_out".to_string()),
                SyncOp::Upload("moved_in".to_string()),
                SyncOp::Remove("a".to_string()),
            ]
        );
    }

    #[test]
    fn test_ignored_root_and_directory_modify_are_dropped() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let ops = planner(dir.path()).plan(vec![
            Change::Created(dir.path().join(".notes.swp")),
            Change::Modified(dir.path().to_path_buf()),
            Change::Modified(dir.path().join("sub")),
            Change::Created(PathBuf::from("/elsewhere/file")),
        ]);
        assert!(ops.is_empty());
    }

    #[test]
    fn test_rescan_reconciles_root() {
        let dir = TempDir::new().unwrap();
        let ops = planner(dir.path()).plan(vec![Change::Rescan, Change::Rescan]);
        assert_eq!(ops, vec![SyncOp::Upload(String::new())]);
    }
}
