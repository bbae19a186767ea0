//! Locating the `ssh` client executable.

use std::path::{Path, PathBuf};

use logwatch_core::SessionError;

/// Default client program name.
pub const SSH_PROGRAM: &str = "ssh";

/// Resolve the ssh client.
///
/// The search order is:
/// 1. An explicit path from configuration (absolute, or looked up on PATH).
/// 2. `ssh` on the current process PATH via `which`.
///
/// # Errors
/// Returns an I/O `NotFound` error when nothing resolves.
pub async fn resolve_ssh_binary(explicit: Option<&Path>) -> Result<PathBuf, SessionError> {
    let wanted = explicit.unwrap_or_else(|| Path::new(SSH_PROGRAM));

    if wanted.is_absolute() {
        if wanted.is_file() {
            return Ok(wanted.to_path_buf());
        }
    } else if let Some(found) = which_async(wanted.as_os_str().to_owned()).await {
        return Ok(found);
    }

    Err(SessionError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("ssh client not found: {}", wanted.display()),
    )))
}

async fn which_async(executable: std::ffi::OsString) -> Option<PathBuf> {
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_absolute_path_is_not_found() {
        let err = resolve_ssh_binary(Some(Path::new("/nonexistent/bin/ssh")))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Io(e) if e.kind() == std::io::ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_explicit_absolute_file_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("ssh");
        std::fs::write(&fake, "#!/bin/sh\n").unwrap();

        let resolved = resolve_ssh_binary(Some(&fake)).await.unwrap();
        assert_eq!(resolved, fake);
    }
}
