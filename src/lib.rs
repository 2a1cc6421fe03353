pub mod adapters;
pub mod client;
pub mod config;
pub mod core;
pub mod domain;
pub mod protocol;
pub mod server;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{FtpEndpoint, FtpRemote, LocalMirror};
pub use client::FtpClient;
pub use config::{ClientSettings, ServerSettings, TomlConfig};
pub use crate::core::{engine::SyncEngine, snapshot::TreeSnapshot};
pub use server::{FtpServer, ServerOptions};
pub use utils::error::{Result, SyncError};
