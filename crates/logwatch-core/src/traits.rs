//! The seam between the monitoring pipeline and a remote host.

use std::time::Duration;

use async_trait::async_trait;
use command_group::AsyncGroupChild;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncRead;

/// Remote session error.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Credentials rejected. Fatal, never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),
    /// Host unreachable or connection lost.
    #[error("Network error: {0}")]
    Network(String),
    /// One-shot command did not finish in time.
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),
    #[error("Session is not connected")]
    NotConnected,
    /// Remote command ran but reported failure.
    #[error("Remote command exited with status {status}: {stderr}")]
    Remote { status: i32, stderr: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::NotConnected)
    }
}

/// Result of a one-shot command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// A running streaming command.
///
/// Owns the output reader and, for process-backed sessions, the local client
/// process. Dropping the handle kills that process.
pub struct CommandHandle {
    output: Box<dyn AsyncRead + Send + Unpin>,
    child: Option<AsyncGroupChild>,
}

impl CommandHandle {
    /// Wrap a bare reader (no local process to reap).
    #[must_use]
    pub fn new(output: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            output: Box::new(output),
            child: None,
        }
    }

    /// Wrap a reader backed by a spawned process group.
    #[must_use]
    pub fn with_child(output: impl AsyncRead + Send + Unpin + 'static, child: AsyncGroupChild) -> Self {
        Self {
            output: Box::new(output),
            child: Some(child),
        }
    }

    /// The raw output stream.
    pub fn output(&mut self) -> &mut (dyn AsyncRead + Send + Unpin) {
        &mut *self.output
    }

    /// Kill the backing process group, if any. Idempotent.
    pub async fn terminate(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!("Failed to kill streaming command: {e}");
            }
        }
    }
}

impl std::fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandle")
            .field("has_child", &self.child.is_some())
            .finish_non_exhaustive()
    }
}

/// One authenticated connection to a remote host.
///
/// Implementations multiplex every command over a single physical
/// connection; a failure on one command channel is reported only to that
/// channel's consumer.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Establish the connection. Idempotent when already connected.
    ///
    /// Key authentication is tried first; password authentication only
    /// follows an authentication (not network) failure.
    async fn connect(&self) -> Result<(), SessionError>;

    /// Whether `connect` succeeded and `close` has not run since.
    fn is_connected(&self) -> bool;

    /// Probe the live connection. Defaults to the cached state.
    async fn is_alive(&self) -> bool {
        self.is_connected()
    }

    /// Run a command to completion.
    async fn execute(&self, command: &str, timeout: Duration) -> Result<CommandOutput, SessionError>;

    /// Start a non-terminating command on a remote pseudo-terminal.
    async fn open_streaming_command(&self, command: &str) -> Result<CommandHandle, SessionError>;

    /// Read a remote text file.
    async fn read_file(&self, path: &str) -> Result<String, SessionError>;

    /// Replace a remote text file.
    async fn write_file(&self, path: &str, contents: &str) -> Result<(), SessionError>;

    /// Tear down the connection and every command opened on it. Idempotent.
    async fn close(&self);
}
