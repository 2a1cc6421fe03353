// Adapters layer: concrete RemoteStore implementations.

pub mod ftp;
pub mod local;

pub use ftp::{FtpEndpoint, FtpRemote};
pub use local::LocalMirror;
