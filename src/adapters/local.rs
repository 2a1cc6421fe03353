use crate::core::snapshot::file_md5_async;
use crate::domain::model::RemoteEntry;
use crate::domain::ports::RemoteStore;
use crate::utils::error::Result;
use crate::utils::fs::{join_relative, list_entries};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// RemoteStore that mirrors into another local directory. Semantics follow
/// the FTP server: `make_dir` fails on existing dirs, `remove_dir` needs an
/// empty dir.
#[derive(Debug, Clone)]
pub struct LocalMirror {
    root: PathBuf,
}

impl LocalMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, relative: &str) -> PathBuf {
        join_relative(&self.root, relative)
    }
}

#[async_trait]
impl RemoteStore for LocalMirror {
    async fn make_dir(&mut self, path: &str) -> Result<()> {
        tokio::fs::create_dir(self.path(path)).await?;
        Ok(())
    }

    async fn remove_dir(&mut self, path: &str) -> Result<()> {
        tokio::fs::remove_dir(self.path(path)).await?;
        Ok(())
    }

    async fn remove_file(&mut self, path: &str) -> Result<()> {
        tokio::fs::remove_file(self.path(path)).await?;
        Ok(())
    }

    async fn upload(&mut self, path: &str, local: &Path) -> Result<()> {
        tokio::fs::copy(local, self.path(path)).await?;
        Ok(())
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        tokio::fs::rename(self.path(from), self.path(to)).await?;
        Ok(())
    }

    async fn list_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        Ok(list_entries(&self.path(path)).await?)
    }

    async fn checksum(&mut self, path: &str) -> Result<Option<String>> {
        Ok(Some(file_md5_async(&self.path(path)).await?))
    }
}
