//! FTP server exposing a directory to the sync client.

pub mod auth;
pub mod fs;
mod session;

pub use auth::{Authorizer, Perm, Permissions};

use crate::protocol::Reply;
use crate::utils::error::{Result, SyncError};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub const DEFAULT_PORT: u16 = 1026;
pub const DEFAULT_BANNER: &str = "dropsync ftpd ready.";

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    pub banner: String,
    pub max_connections: usize,
    pub idle_timeout: Duration,
    pub data_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            banner: DEFAULT_BANNER.to_string(),
            max_connections: 512,
            idle_timeout: Duration::from_secs(300),
            data_timeout: Duration::from_secs(30),
        }
    }
}

pub(crate) struct ServerContext {
    pub(crate) authorizer: Authorizer,
    pub(crate) options: ServerOptions,
}

pub struct FtpServer {
    listener: TcpListener,
    context: Arc<ServerContext>,
}

impl FtpServer {
    pub async fn bind(options: ServerOptions, authorizer: Authorizer) -> Result<Self> {
        let listener = TcpListener::bind((options.host.as_str(), options.port))
            .await
            .map_err(SyncError::network)?;
        tracing::info!(
            "Serving FTP on {}",
            listener.local_addr().map_err(SyncError::network)?
        );
        Ok(Self {
            listener,
            context: Arc::new(ServerContext {
                authorizer,
                options,
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(SyncError::network)
    }

    pub async fn serve(self) -> Result<()> {
        self.serve_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves, then closes the sessions
    /// still open and releases the port.
    pub async fn serve_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let limiter = Arc::new(Semaphore::new(self.context.options.max_connections));
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(open = sessions.len(), "Server shutting down");
                    break;
                }
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
                accepted = self.listener.accept() => {
                    let (mut stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            // Usually EMFILE; keep serving the sessions we have
                            tracing::error!("Accept failed: {}", e);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            continue;
                        }
                    };

                    let Ok(permit) = limiter.clone().try_acquire_owned() else {
                        tracing::warn!(%peer, "Connection limit reached");
                        tokio::spawn(async move {
                            let _ = Reply::new(421, "Too many connections. Service temporarily unavailable.")
                                .write_to(&mut stream)
                                .await;
                        });
                        continue;
                    };

                    tracing::info!(%peer, "Connection accepted");
                    let context = self.context.clone();
                    sessions.spawn(async move {
                        if let Err(e) = session::handle_connection(stream, peer, context).await {
                            tracing::warn!(%peer, "Session ended with error: {}", e);
                        }
                        drop(permit);
                    });
                }
            }
        }
        sessions.shutdown().await;
        Ok(())
    }
}
