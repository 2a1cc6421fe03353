use crate::adapters::FtpEndpoint;
use crate::config::toml_config::{ClientSection, ServerSection, TomlConfig};
use crate::domain::ports::ClientSettingsProvider;
use crate::server::auth::{DEFAULT_PASSWORD, DEFAULT_USER, FULL_PERMISSIONS};
use crate::server::{Authorizer, ServerOptions};
use crate::utils::error::{Result, SyncError};
use crate::utils::validation::{
    validate_existing_dir, validate_ftp_url, validate_non_empty_string, validate_positive_number,
    validate_range, validate_required_field, Validate,
};
use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const DEFAULT_SERVER_PATH: &str = "/tmp/dropbox/server";
pub const DEFAULT_CLIENT_PATH: &str = "/tmp/dropbox/client";

#[derive(Debug, Clone)]
pub struct UserSpec {
    pub name: String,
    pub password: String,
    pub home: Option<PathBuf>,
    pub perm: String,
}

/// Fully resolved server settings: defaults, then the TOML file, then CLI flags.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub options: ServerOptions,
    pub root: PathBuf,
    pub users: Vec<UserSpec>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            options: ServerOptions::default(),
            root: PathBuf::from(DEFAULT_SERVER_PATH),
            users: vec![UserSpec {
                name: DEFAULT_USER.to_string(),
                password: DEFAULT_PASSWORD.to_string(),
                home: None,
                perm: FULL_PERMISSIONS.to_string(),
            }],
        }
    }
}

impl ServerSettings {
    pub fn from_toml(config: Option<&TomlConfig>) -> Self {
        let mut settings = Self::default();
        if let Some(section) = config.and_then(|c| c.server.as_ref()) {
            settings.merge(section);
        }
        settings
    }

    fn merge(&mut self, section: &ServerSection) {
        if let Some(host) = &section.host {
            self.options.host = host.clone();
        }
        if let Some(port) = section.port {
            self.options.port = port;
        }
        if let Some(path) = &section.path {
            self.root = PathBuf::from(path);
        }
        if let Some(banner) = &section.banner {
            self.options.banner = banner.clone();
        }
        if let Some(max) = section.max_connections {
            self.options.max_connections = max;
        }
        if let Some(secs) = section.idle_timeout_secs {
            self.options.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = section.data_timeout_secs {
            self.options.data_timeout = Duration::from_secs(secs);
        }
        if let Some(users) = &section.users {
            self.users = users
                .iter()
                .map(|u| UserSpec {
                    name: u.name.clone(),
                    password: u.password.clone(),
                    home: u.home.as_ref().map(PathBuf::from),
                    perm: u.perm.clone().unwrap_or_else(|| FULL_PERMISSIONS.to_string()),
                })
                .collect();
        }
    }

    pub fn build_authorizer(&self) -> Result<Authorizer> {
        let mut authorizer = Authorizer::new();
        for user in &self.users {
            let home = user.home.clone().unwrap_or_else(|| self.root.clone());
            authorizer.add_user(&user.name, &user.password, home, &user.perm)?;
            if user.name == DEFAULT_USER && user.password == DEFAULT_PASSWORD {
                tracing::warn!("User '{}' has the default password", user.name);
            }
        }
        Ok(authorizer)
    }
}

impl Validate for ServerSettings {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("server.host", &self.options.host)?;
        validate_existing_dir("server.path", &self.root.to_string_lossy())?;
        validate_range(
            "server.max_connections",
            self.options.max_connections,
            1,
            Semaphore::MAX_PERMITS,
        )?;
        validate_positive_number("server.users", self.users.len(), 1)?;
        for user in &self.users {
            validate_non_empty_string("server.users.name", &user.name)?;
            crate::server::Permissions::parse(&user.perm)?;
        }
        Ok(())
    }
}

/// Fully resolved client settings.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub endpoint: FtpEndpoint,
    pub root: PathBuf,
    pub debounce_ms: u64,
    pub rescan_interval_secs: u64,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub ignore: Vec<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            endpoint: FtpEndpoint {
                host: "127.0.0.1".to_string(),
                port: crate::server::DEFAULT_PORT,
                user: DEFAULT_USER.to_string(),
                password: DEFAULT_PASSWORD.to_string(),
                timeout: crate::client::DEFAULT_TIMEOUT,
            },
            root: PathBuf::from(DEFAULT_CLIENT_PATH),
            debounce_ms: 200,
            rescan_interval_secs: 0,
            reconnect_attempts: 5,
            reconnect_delay_ms: 1000,
            ignore: Vec::new(),
        }
    }
}

impl ClientSettings {
    pub fn from_toml(config: Option<&TomlConfig>) -> Result<Self> {
        let mut settings = Self::default();
        if let Some(section) = config.and_then(|c| c.client.as_ref()) {
            settings.merge(section)?;
        }
        Ok(settings)
    }

    fn merge(&mut self, section: &ClientSection) -> Result<()> {
        if let Some(url) = &section.url {
            self.apply_url(url)?;
        }
        if let Some(host) = &section.host {
            self.endpoint.host = host.clone();
        }
        if let Some(port) = section.port {
            self.endpoint.port = port;
        }
        if let Some(user) = &section.user {
            self.endpoint.user = user.clone();
        }
        if let Some(password) = &section.password {
            self.endpoint.password = password.clone();
        }
        if let Some(secs) = section.timeout_secs {
            self.endpoint.timeout = Duration::from_secs(secs);
        }
        if let Some(path) = &section.path {
            self.root = PathBuf::from(path);
        }
        if let Some(ms) = section.debounce_ms {
            self.debounce_ms = ms;
        }
        if let Some(secs) = section.rescan_interval_secs {
            self.rescan_interval_secs = secs;
        }
        if let Some(attempts) = section.reconnect_attempts {
            self.reconnect_attempts = attempts;
        }
        if let Some(ms) = section.reconnect_delay_ms {
            self.reconnect_delay_ms = ms;
        }
        if let Some(ignore) = &section.ignore {
            self.ignore = ignore.clone();
        }
        Ok(())
    }

    /// Takes host, port and credentials from an `ftp://` URL.
    pub fn apply_url(&mut self, url: &str) -> Result<()> {
        let parsed = validate_ftp_url("client.url", url)?;
        let host = parsed.host_str().map(str::to_string);
        self.endpoint.host = validate_required_field("client.url.host", &host)?.clone();
        if let Some(port) = parsed.port() {
            self.endpoint.port = port;
        }
        if !parsed.username().is_empty() {
            self.endpoint.user = decode_userinfo("client.url.user", parsed.username())?;
        }
        if let Some(password) = parsed.password() {
            self.endpoint.password = decode_userinfo("client.url.password", password)?;
        }
        Ok(())
    }
}

/// `Url` keeps userinfo percent-encoded.
fn decode_userinfo(field: &str, raw: &str) -> Result<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| SyncError::InvalidConfigValueError {
            field: field.to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

impl Validate for ClientSettings {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("client.host", &self.endpoint.host)?;
        validate_range("client.port", self.endpoint.port, 1, u16::MAX)?;
        validate_non_empty_string("client.user", &self.endpoint.user)?;
        validate_existing_dir("client.path", &self.root.to_string_lossy())?;
        validate_range("client.debounce_ms", self.debounce_ms, 0, 60_000)?;
        crate::utils::pattern::IgnoreSet::new(&self.ignore)?;
        Ok(())
    }
}

impl ClientSettingsProvider for ClientSettings {
    fn local_root(&self) -> &Path {
        &self.root
    }

    fn debounce_ms(&self) -> u64 {
        self.debounce_ms
    }

    fn rescan_interval_secs(&self) -> u64 {
        self.rescan_interval_secs
    }

    fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    fn reconnect_delay_ms(&self) -> u64 {
        self.reconnect_delay_ms
    }

    fn ignore_patterns(&self) -> &[String] {
        &self.ignore
    }
}
