use crate::client::FtpClient;
use crate::domain::model::RemoteEntry;
use crate::domain::ports::RemoteStore;
use crate::utils::error::{Result, SyncError};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FtpEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub timeout: Duration,
}

/// RemoteStore backed by an FTP server. Holds the endpoint so it can log in
/// again after the control connection drops.
pub struct FtpRemote {
    endpoint: FtpEndpoint,
    client: Option<FtpClient>,
}

impl FtpRemote {
    pub async fn connect(endpoint: FtpEndpoint) -> Result<Self> {
        let client = Self::open(&endpoint).await?;
        Ok(Self {
            endpoint,
            client: Some(client),
        })
    }

    async fn open(endpoint: &FtpEndpoint) -> Result<FtpClient> {
        let mut client =
            FtpClient::connect_with_timeout(&endpoint.host, endpoint.port, endpoint.timeout).await?;
        client.login(&endpoint.user, &endpoint.password).await?;
        tracing::info!(
            "Logged in to {}:{} as {}",
            endpoint.host,
            endpoint.port,
            endpoint.user
        );
        Ok(client)
    }

    fn client(&mut self) -> Result<&mut FtpClient> {
        self.client.as_mut().ok_or(SyncError::ConnectionClosed)
    }

    /// Drops the connection after a transport error so later calls fail fast
    /// until `reconnect` succeeds.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_transport() {
                self.client = None;
            }
        }
        result
    }
}

#[async_trait]
impl RemoteStore for FtpRemote {
    async fn make_dir(&mut self, path: &str) -> Result<()> {
        let result = self.client()?.mkd(path).await;
        self.track(result)
    }

    async fn remove_dir(&mut self, path: &str) -> Result<()> {
        let result = self.client()?.rmd(path).await;
        self.track(result)
    }

    async fn remove_file(&mut self, path: &str) -> Result<()> {
        let result = self.client()?.dele(path).await;
        self.track(result)
    }

    async fn upload(&mut self, path: &str, local: &Path) -> Result<()> {
        let result = self.client()?.store_file(path, local).await;
        let bytes = self.track(result)?;
        tracing::debug!("Uploaded {} ({} bytes)", path, bytes);
        Ok(())
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let result = self.client()?.rename(from, to).await;
        self.track(result)
    }

    async fn list_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        let result = self.client()?.list(path).await;
        self.track(result)
    }

    async fn checksum(&mut self, path: &str) -> Result<Option<String>> {
        let result = self.client()?.md5(path).await;
        match self.track(result) {
            Ok(hash) => Ok(Some(hash)),
            // 500/502: the server has no XMD5
            Err(SyncError::FtpError { code: 500 | 502, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.client = None;
        self.client = Some(Self::open(&self.endpoint).await?);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        match self.client.take() {
            Some(client) => client.quit().await,
            None => Ok(()),
        }
    }
}
