pub mod engine;
pub mod planner;
pub mod snapshot;
pub mod watcher;

pub use crate::domain::model::{Change, EntryKind, RemoteEntry, SyncOp};
pub use crate::domain::ports::{ClientSettingsProvider, RemoteStore};
pub use crate::utils::error::Result;
