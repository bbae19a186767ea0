//! Non-interactive secret delivery through `SSH_ASKPASS`.
//!
//! The helper script holds no secret; it echoes an environment variable that
//! is set only on the ssh child process.

use std::{
    io,
    path::{Path, PathBuf},
};

use tokio::process::Command;

const SCRIPT_NAME: &str = "askpass.sh";
const SECRET_ENV: &str = "LOGWATCH_ASKPASS_SECRET";
const SCRIPT: &str = "#!/bin/sh\nprintf '%s\\n' \"$LOGWATCH_ASKPASS_SECRET\"\n";

/// Write the helper into `dir` (mode 0700) and return its path.
pub(crate) async fn install(dir: &Path) -> io::Result<PathBuf> {
    let path = dir.join(SCRIPT_NAME);
    tokio::fs::write(&path, SCRIPT).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700)).await?;
    }
    Ok(path)
}

/// Route any passphrase/password prompt of `cmd` to the helper.
pub(crate) fn apply(cmd: &mut Command, script: &Path, secret: &str) {
    cmd.env("SSH_ASKPASS", script)
        .env("SSH_ASKPASS_REQUIRE", "force")
        .env(SECRET_ENV, secret);
    // Older clients only consult SSH_ASKPASS when DISPLAY is set.
    if std::env::var_os("DISPLAY").is_none() {
        cmd.env("DISPLAY", ":0");
    }
}
