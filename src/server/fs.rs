use crate::utils::error::{Result, SyncError};
use std::path::{Path, PathBuf};

/// A path as the client sees it (`/a/b`) and where it lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub virtual_path: String,
    pub real: PathBuf,
}

impl ResolvedPath {
    pub fn is_root(&self) -> bool {
        self.virtual_path == "/"
    }
}

/// Per-session view of a user's home directory. `/` is the home; nothing
/// resolves above it.
#[derive(Debug, Clone)]
pub struct VirtualFs {
    root: PathBuf,
    cwd: String,
}

impl VirtualFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cwd: "/".to_string(),
        }
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn set_cwd(&mut self, path: &ResolvedPath) {
        self.cwd = path.virtual_path.clone();
    }

    pub fn resolve(&self, arg: &str) -> Result<ResolvedPath> {
        if arg.contains('\0') {
            return Err(SyncError::PathOutsideRoot {
                path: arg.replace('\0', "\\0"),
            });
        }

        let mut components: Vec<&str> = Vec::new();
        let base = if arg.starts_with('/') { "" } else { self.cwd.as_str() };
        for part in base.split('/').chain(arg.split('/')) {
            match part {
                "" | "." => {}
                ".." => {
                    components.pop();
                }
                other => components.push(other),
            }
        }

        let real = components
            .iter()
            .fold(self.root.clone(), |acc, c| acc.join(c));
        self.check_symlink_escape(&real, arg)?;

        Ok(ResolvedPath {
            virtual_path: format!("/{}", components.join("/")),
            real,
        })
    }

    /// Symlinks inside the home must not lead outside of it.
    fn check_symlink_escape(&self, real: &Path, arg: &str) -> Result<()> {
        let existing = real.ancestors().find(|p| p.exists());
        if let (Some(existing), Ok(root)) = (existing, self.root.canonicalize()) {
            if let Ok(canonical) = existing.canonicalize() {
                if !canonical.starts_with(&root) {
                    return Err(SyncError::PathOutsideRoot {
                        path: arg.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
