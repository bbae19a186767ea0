//! Argument building for the `ssh` client.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Host is empty")]
    EmptyHost,
    #[error("Host cannot start with '-': {0}")]
    InvalidHost(String),
    #[error("Remote command is empty")]
    EmptyCommand,
    #[error("Failed to quote argument: {0}")]
    QuoteError(#[from] shlex::QuoteError),
}

impl From<CommandBuildError> for logwatch_core::SessionError {
    fn from(err: CommandBuildError) -> Self {
        Self::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, err))
    }
}

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshTarget {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    /// Private key; `None` lets the client use its defaults/agent.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
}

const fn default_port() -> u16 {
    22
}

impl SshTarget {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            identity_file: None,
        }
    }

    #[must_use]
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }
}

/// Authentication method offered to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    PublicKey,
    Password,
}

/// Builder for `ssh` argument vectors.
#[derive(Debug, Clone)]
pub struct SshCommandBuilder {
    target: SshTarget,
    options: Vec<(String, String)>,
    auth: Option<AuthMethod>,
    force_tty: bool,
    no_command: bool,
    control_op: Option<&'static str>,
}

impl SshCommandBuilder {
    /// Create a new builder for `target`.
    #[must_use]
    pub const fn new(target: SshTarget) -> Self {
        Self {
            target,
            options: Vec::new(),
            auth: None,
            force_tty: false,
            no_command: false,
            control_op: None,
        }
    }

    /// Add `-o key=value`.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((key.into(), value.into()));
        self
    }

    /// Extend with several `-o` options.
    #[must_use]
    pub fn options<I, K, V>(mut self, more: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.options
            .extend(more.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Connection-level options shared by every invocation.
    #[must_use]
    pub fn connection_defaults(self, connect_timeout: Duration) -> Self {
        self.option("ConnectTimeout", connect_timeout.as_secs().max(1).to_string())
            .option("StrictHostKeyChecking", "accept-new")
            .option("ServerAliveInterval", "15")
            .option("ServerAliveCountMax", "3")
    }

    /// Use (or become) the multiplexing master at `path`.
    #[must_use]
    pub fn control(self, path: &std::path::Path, master: bool) -> Self {
        self.option("ControlPath", path.to_string_lossy())
            .option("ControlMaster", if master { "yes" } else { "no" })
    }

    /// Never prompt.
    #[must_use]
    pub fn batch_mode(self) -> Self {
        self.option("BatchMode", "yes")
    }

    /// Restrict authentication to `method`.
    #[must_use]
    pub const fn auth(mut self, method: AuthMethod) -> Self {
        self.auth = Some(method);
        self
    }

    /// Allocate a remote pseudo-terminal even without a local one (`-tt`).
    #[must_use]
    pub const fn force_tty(mut self) -> Self {
        self.force_tty = true;
        self
    }

    /// Hold the connection open without running anything (`-N`).
    #[must_use]
    pub const fn no_command(mut self) -> Self {
        self.no_command = true;
        self
    }

    /// Send a multiplexing control request (`-O check`, `-O exit`).
    #[must_use]
    pub const fn control_op(mut self, op: &'static str) -> Self {
        self.control_op = Some(op);
        self
    }

    /// Build the argument vector, optionally with a remote command.
    ///
    /// # Errors
    /// Returns error if the host or command is unusable.
    pub fn build(&self, remote_command: Option<&str>) -> Result<Vec<String>, CommandBuildError> {
        let host = self.target.host.trim();
        if host.is_empty() {
            return Err(CommandBuildError::EmptyHost);
        }
        if host.starts_with('-') {
            return Err(CommandBuildError::InvalidHost(host.to_string()));
        }
        if remote_command.is_some_and(|c| c.trim().is_empty()) {
            return Err(CommandBuildError::EmptyCommand);
        }

        let mut args = Vec::new();
        for (key, value) in self.options.iter().chain(self.auth_options().iter()) {
            args.push("-o".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push("-p".to_string());
        args.push(self.target.port.to_string());
        args.push("-l".to_string());
        args.push(self.target.user.clone());

        if self.auth == Some(AuthMethod::PublicKey) {
            if let Some(identity) = &self.target.identity_file {
                args.push("-i".to_string());
                args.push(identity.to_string_lossy().into_owned());
            }
        }
        if self.force_tty {
            args.push("-tt".to_string());
        }
        if self.no_command {
            args.push("-N".to_string());
        }
        if let Some(op) = self.control_op {
            args.push("-O".to_string());
            args.push(op.to_string());
        }

        args.push(host.to_string());
        if let Some(command) = remote_command {
            args.push(command.to_string());
        }
        Ok(args)
    }

    fn auth_options(&self) -> Vec<(String, String)> {
        let pairs: &[(&str, &str)] = match self.auth {
            None => &[],
            Some(AuthMethod::PublicKey) => &[
                ("PreferredAuthentications", "publickey"),
                ("PasswordAuthentication", "no"),
                ("KbdInteractiveAuthentication", "no"),
            ],
            Some(AuthMethod::Password) => &[
                ("PreferredAuthentications", "password,keyboard-interactive"),
                ("PubkeyAuthentication", "no"),
                ("NumberOfPasswordPrompts", "1"),
            ],
        };
        let mut options: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        if self.auth == Some(AuthMethod::PublicKey) && self.target.identity_file.is_some() {
            options.push(("IdentitiesOnly".to_string(), "yes".to_string()));
        }
        options
    }
}

/// Shell-quote a remote path for use inside a command line.
///
/// # Errors
/// Returns error if the path contains a NUL byte.
pub fn quote_path(path: &str) -> Result<String, CommandBuildError> {
    Ok(shlex::try_quote(path)?.into_owned())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn target() -> SshTarget {
        SshTarget::new("10.0.0.5", 7722, "root").with_identity_file("/keys/box")
    }

    fn has_option(args: &[String], option: &str) -> bool {
        args.windows(2).any(|w| w[0] == "-o" && w[1] == option)
    }

    #[test]
    fn test_streaming_command_forces_tty_and_ends_with_command() {
        let args = SshCommandBuilder::new(target())
            .control(Path::new("/run/lw/cm"), false)
            .batch_mode()
            .force_tty()
            .build(Some("tail -f /var/log/suricata/suricata.log"))
            .unwrap();

        assert!(args.contains(&"-tt".to_string()));
        assert!(has_option(&args, "ControlPath=/run/lw/cm"));
        assert!(has_option(&args, "ControlMaster=no"));
        assert!(has_option(&args, "BatchMode=yes"));
        let n = args.len();
        assert_eq!(args[n - 2], "10.0.0.5");
        assert_eq!(args[n - 1], "tail -f /var/log/suricata/suricata.log");
    }

    #[test]
    fn test_port_and_user_are_passed() {
        let args = SshCommandBuilder::new(target()).build(None).unwrap();
        let port = args.iter().position(|a| a == "-p").unwrap();
        assert_eq!(args[port + 1], "7722");
        let user = args.iter().position(|a| a == "-l").unwrap();
        assert_eq!(args[user + 1], "root");
    }

    #[test]
    fn test_public_key_auth_uses_identity() {
        let args = SshCommandBuilder::new(target())
            .auth(AuthMethod::PublicKey)
            .no_command()
            .build(None)
            .unwrap();
        assert!(has_option(&args, "PreferredAuthentications=publickey"));
        assert!(has_option(&args, "IdentitiesOnly=yes"));
        assert!(args.contains(&"-i".to_string()));
        assert!(args.contains(&"-N".to_string()));
    }

    #[test]
    fn test_password_auth_skips_identity() {
        let args = SshCommandBuilder::new(target())
            .auth(AuthMethod::Password)
            .build(None)
            .unwrap();
        assert!(has_option(&args, "PubkeyAuthentication=no"));
        assert!(!args.contains(&"-i".to_string()));
    }

    #[test]
    fn test_rejects_option_like_host() {
        let bad = SshTarget::new("-oProxyCommand=x", 22, "root");
        assert!(matches!(
            SshCommandBuilder::new(bad).build(None),
            Err(CommandBuildError::InvalidHost(_))
        ));
    }

    #[test]
    fn test_rejects_blank_command() {
        assert!(matches!(
            SshCommandBuilder::new(target()).build(Some("  ")),
            Err(CommandBuildError::EmptyCommand)
        ));
    }

    #[test]
    fn test_quote_path_survives_remote_shell() {
        for path in ["/data/rules/a b.rules", "/plain/path", "/x/it's;rm -rf"] {
            let quoted = quote_path(path).unwrap();
            assert_eq!(shlex::split(&quoted).unwrap(), [path]);
        }
        assert!(quote_path("/nul\0byte").is_err());
    }
}
