use crate::domain::model::RemoteEntry;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// The side the client mirrors into. Paths are relative to the remote root,
/// `/`-separated, and never empty except for the root listing.
#[async_trait]
pub trait RemoteStore: Send {
    async fn make_dir(&mut self, path: &str) -> Result<()>;
    async fn remove_dir(&mut self, path: &str) -> Result<()>;
    async fn remove_file(&mut self, path: &str) -> Result<()>;
    async fn upload(&mut self, path: &str, local: &Path) -> Result<()>;
    async fn rename(&mut self, from: &str, to: &str) -> Result<()>;
    async fn list_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Lowercase hex md5, or `None` when the store cannot compute one.
    async fn checksum(&mut self, path: &str) -> Result<Option<String>>;

    /// Re-establish the connection after a transport error.
    async fn reconnect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait ClientSettingsProvider: Send + Sync {
    fn local_root(&self) -> &Path;
    fn debounce_ms(&self) -> u64;
    fn rescan_interval_secs(&self) -> u64;
    fn reconnect_attempts(&self) -> u32;
    fn reconnect_delay_ms(&self) -> u64;
    fn ignore_patterns(&self) -> &[String];
}
