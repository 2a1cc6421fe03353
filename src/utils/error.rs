use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Network error: {source}")]
    NetworkError {
        #[source]
        source: std::io::Error,
    },

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Timed out while {operation}")]
    TimeoutError { operation: String },

    #[error("FTP error {code}: {message}")]
    FtpError { code: u16, message: String },

    #[error("Protocol error: {message}")]
    ProtocolError { message: String },

    #[error("File watcher error: {0}")]
    WatchError(#[from] notify::Error),

    #[error("Path escapes sync root: {path}")]
    PathOutsideRoot { path: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Sync error: {message}")]
    SyncFailed { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Protocol,
    FileSystem,
    Configuration,
    Sync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl SyncError {
    pub fn network(source: std::io::Error) -> Self {
        SyncError::NetworkError { source }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        SyncError::ProtocolError {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        SyncError::TimeoutError {
            operation: operation.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::NetworkError { .. }
            | SyncError::ConnectionClosed
            | SyncError::TimeoutError { .. } => ErrorCategory::Network,
            SyncError::FtpError { .. } | SyncError::ProtocolError { .. } => {
                ErrorCategory::Protocol
            }
            SyncError::IoError(_) | SyncError::WatchError(_) | SyncError::PathOutsideRoot { .. } => {
                ErrorCategory::FileSystem
            }
            SyncError::ConfigError { .. }
            | SyncError::ConfigValidationError { .. }
            | SyncError::InvalidConfigValueError { .. }
            | SyncError::MissingConfigError { .. } => ErrorCategory::Configuration,
            SyncError::SyncFailed { .. } => ErrorCategory::Sync,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Protocol | ErrorCategory::Sync => ErrorSeverity::High,
            ErrorCategory::FileSystem => match self {
                SyncError::WatchError(_) => ErrorSeverity::Critical,
                _ => ErrorSeverity::High,
            },
            ErrorCategory::Configuration => ErrorSeverity::Critical,
        }
    }

    /// Errors that mean the control connection is no longer usable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SyncError::NetworkError { .. }
                | SyncError::ConnectionClosed
                | SyncError::TimeoutError { .. }
        )
    }

    /// 5xx replies: retrying the same command will not help.
    pub fn is_permanent_reply(&self) -> bool {
        matches!(self, SyncError::FtpError { code, .. } if (500..600).contains(code))
    }

    /// 4xx replies, such as 425/426 for a failed data connection.
    pub fn is_transient_reply(&self) -> bool {
        matches!(self, SyncError::FtpError { code, .. } if (400..500).contains(code))
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            SyncError::NetworkError { .. } | SyncError::ConnectionClosed => {
                "Check that the server is running and reachable on the configured host and port"
            }
            SyncError::TimeoutError { .. } => {
                "The peer is slow or unreachable; retry or raise the timeout"
            }
            SyncError::FtpError { code: 530, .. } => "Check the user name and password",
            SyncError::FtpError { .. } => {
                "Check the user's permission string and the server directory"
            }
            SyncError::ProtocolError { .. } => "Make sure the peer speaks FTP",
            SyncError::WatchError(_) => {
                "Check the inotify watch limit (fs.inotify.max_user_watches) and that the path exists"
            }
            SyncError::IoError(_) => "Check that the path exists and is readable",
            SyncError::PathOutsideRoot { .. } => "Only paths inside the sync root are synchronized",
            SyncError::ConfigError { .. }
            | SyncError::ConfigValidationError { .. }
            | SyncError::InvalidConfigValueError { .. }
            | SyncError::MissingConfigError { .. } => {
                "Fix the configuration file or command-line flags"
            }
            SyncError::SyncFailed { .. } => "Restart the client to run a full resync",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Network => format!("Could not talk to the sync server: {}", self),
            ErrorCategory::Protocol => format!("The server rejected a request: {}", self),
            ErrorCategory::FileSystem => format!("Local filesystem problem: {}", self),
            ErrorCategory::Configuration => format!("Invalid configuration: {}", self),
            ErrorCategory::Sync => format!("Synchronization stopped: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
