mod build;
mod changes;
mod error;
mod server;
mod session;
mod versions;
mod watcher;

pub use build::{BuildBackend, BuildError, BuiltDelta};
pub use changes::ChangeQueue;
pub use error::ServerError;
pub use server::HostServer;
pub use session::SessionState;
pub use versions::VersionRegistry;
pub use watcher::{ChangeWatcher, WatcherError};
