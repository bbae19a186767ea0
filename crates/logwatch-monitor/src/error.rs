//! Monitor error types.

use logwatch_collect::WatchError;
use logwatch_core::SessionError;

/// Monitor startup error.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Watcher error: {0}")]
    Watch(#[from] WatchError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    /// Credentials were rejected; retrying cannot help.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Session(e) if e.is_auth())
    }
}
