//! `RemoteSession` over an OpenSSH ControlMaster connection.
//!
//! One master process owns the physical connection; every one-shot or
//! streaming command is a separate client process multiplexed over the
//! master's control socket. Killing the master tears down every channel.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::{
        PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use logwatch_core::{CommandHandle, CommandOutput, RemoteSession, SessionError};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    process::Command,
    sync::Mutex,
    task::JoinHandle,
    time::Instant,
};

use crate::{
    askpass,
    binary::resolve_ssh_binary,
    command::{AuthMethod, SshCommandBuilder, SshTarget, quote_path},
    credentials::Credentials,
};

/// How often the master is probed while authenticating.
const MASTER_POLL: Duration = Duration::from_millis(200);
/// Extra time allowed on top of the connect timeout for authentication.
const AUTH_GRACE: Duration = Duration::from_secs(10);
/// Budget for `-O check` / `-O exit` control requests.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);
/// Exit status the ssh client uses for its own failures.
const SSH_CLIENT_FAILURE: i32 = 255;

const AUTH_MARKERS: &[&str] = &[
    "permission denied",
    "too many authentication failures",
    "authentication failed",
    "no more authentication methods",
    "incorrect passphrase",
    "load key",
    "bad permissions",
];

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(flatten)]
    pub target: SshTarget,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Directory for the control socket and askpass helper.
    #[serde(default = "default_control_dir")]
    pub control_dir: PathBuf,
    /// Explicit client binary; `ssh` on PATH otherwise.
    #[serde(default)]
    pub ssh_binary: Option<PathBuf>,
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_control_dir() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("logwatch")
}

impl SshConfig {
    #[must_use]
    pub fn new(target: SshTarget) -> Self {
        Self {
            target,
            connect_timeout_secs: default_connect_timeout_secs(),
            control_dir: default_control_dir(),
            ssh_binary: None,
        }
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

struct Master {
    child: AsyncGroupChild,
    auth: AuthMethod,
}

/// OpenSSH-backed session.
pub struct SshSession {
    config: SshConfig,
    credentials: Credentials,
    control_path: PathBuf,
    program: RwLock<Option<PathBuf>>,
    connected: AtomicBool,
    master: Mutex<Option<Master>>,
}

impl SshSession {
    /// Create a disconnected session.
    #[must_use]
    pub fn new(config: SshConfig, credentials: Credentials) -> Self {
        let control_path = config
            .control_dir
            .join(format!("cm-{}-%C", std::process::id()));
        Self {
            config,
            credentials,
            control_path,
            program: RwLock::new(None),
            connected: AtomicBool::new(false),
            master: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SshConfig {
        &self.config
    }

    fn builder(&self) -> SshCommandBuilder {
        SshCommandBuilder::new(self.config.target.clone())
            .connection_defaults(self.config.connect_timeout())
    }

    fn channel_builder(&self) -> SshCommandBuilder {
        self.builder().control(&self.control_path, false).batch_mode()
    }

    fn program(&self) -> Result<PathBuf, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        self.program
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SessionError::NotConnected)
    }

    fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::warn!(host = %self.config.target.host, "ssh session marked disconnected");
        }
    }

    async fn prepare_control_dir(&self) -> Result<(), SessionError> {
        let dir = &self.config.control_dir;
        tokio::fs::create_dir_all(dir).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await?;
        }
        Ok(())
    }

    /// Spawn a master with `method` and wait until its control socket answers.
    async fn start_master(&self, program: &Path, method: AuthMethod) -> Result<Master, SessionError> {
        let secret = match method {
            AuthMethod::PublicKey => self.credentials.key_passphrase(),
            AuthMethod::Password => self.credentials.password(),
        };

        let mut builder = self
            .builder()
            .control(&self.control_path, true)
            .auth(method)
            .no_command();
        if secret.is_none() {
            builder = builder.batch_mode();
        }
        let args = builder.build(None)?;

        let mut cmd = Command::new(program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(secret) = secret {
            let script = askpass::install(&self.config.control_dir).await?;
            askpass::apply(&mut cmd, &script, secret);
        }

        tracing::debug!(host = %self.config.target.host, ?method, "starting ssh master");
        let mut child = cmd.group_spawn()?;
        let stderr = spawn_stderr_collector(child.inner().stderr.take(), "master");

        let deadline = Instant::now() + self.config.connect_timeout() + AUTH_GRACE;
        loop {
            if child.try_wait()?.is_some() {
                let stderr = stderr.await.unwrap_or_default();
                return Err(classify_failure(&stderr));
            }
            if self.control_request(program, "check").await {
                return Ok(Master {
                    child,
                    auth: method,
                });
            }
            if Instant::now() >= deadline {
                let _ = child.kill().await;
                return Err(SessionError::Network(format!(
                    "timed out connecting to {}:{}",
                    self.config.target.host, self.config.target.port
                )));
            }
            tokio::time::sleep(MASTER_POLL).await;
        }
    }

    /// Run `ssh -O <op>` against the control socket; true on exit status 0.
    async fn control_request(&self, program: &Path, op: &'static str) -> bool {
        let Ok(args) = self
            .builder()
            .control(&self.control_path, false)
            .batch_mode()
            .control_op(op)
            .build(None)
        else {
            return false;
        };
        let mut cmd = Command::new(program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        match tokio::time::timeout(CONTROL_TIMEOUT, cmd.status()).await {
            Ok(Ok(status)) => status.success(),
            _ => false,
        }
    }

    fn client_command(&self, program: &Path, args: &[String]) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);
        cmd
    }

    /// Run a client command with optional stdin, bounded by `timeout`.
    async fn run(
        &self,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<CommandOutput, SessionError> {
        let program = self.program()?;
        let args = self.channel_builder().build(Some(command))?;
        let mut cmd = self.client_command(&program, &args);
        cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let exchange = async {
            if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
                pipe.write_all(data).await?;
                pipe.shutdown().await?;
            }
            child.wait_with_output().await
        };
        let output = match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(command, ?timeout, "remote command timed out");
                return Err(SessionError::Timeout(timeout));
            }
        };

        let result = CommandOutput {
            exit_status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if result.exit_status == SSH_CLIENT_FAILURE && !self.is_alive().await {
            self.mark_disconnected();
            return Err(SessionError::Network(result.stderr.trim().to_string()));
        }
        Ok(result)
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn connect(&self) -> Result<(), SessionError> {
        let mut master = self.master.lock().await;

        if self.is_connected() {
            if let Ok(program) = self.program() {
                if self.control_request(&program, "check").await {
                    return Ok(());
                }
            }
            self.mark_disconnected();
        }
        if let Some(mut stale) = master.take() {
            let _ = stale.child.kill().await;
        }

        let program = resolve_ssh_binary(self.config.ssh_binary.as_deref()).await?;
        self.prepare_control_dir().await?;

        let started = match self.start_master(&program, AuthMethod::PublicKey).await {
            Ok(started) => started,
            Err(SessionError::Auth(reason)) if self.credentials.password().is_some() => {
                tracing::warn!(
                    host = %self.config.target.host,
                    %reason,
                    "key authentication rejected, falling back to password"
                );
                self.start_master(&program, AuthMethod::Password).await?
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            host = %self.config.target.host,
            port = self.config.target.port,
            auth = ?started.auth,
            "ssh session connected"
        );
        *self.program.write().unwrap_or_else(PoisonError::into_inner) = Some(program);
        *master = Some(started);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn is_alive(&self) -> bool {
        match self.program() {
            Ok(program) => self.control_request(&program, "check").await,
            Err(_) => false,
        }
    }

    async fn execute(&self, command: &str, timeout: Duration) -> Result<CommandOutput, SessionError> {
        tracing::debug!(command, "executing remote command");
        self.run(command, None, timeout).await
    }

    async fn open_streaming_command(&self, command: &str) -> Result<CommandHandle, SessionError> {
        let program = self.program()?;
        let args = self.channel_builder().force_tty().build(Some(command))?;
        let mut cmd = self.client_command(&program, &args);
        // stdin stays attached to the child so the remote pty never sees EOF.
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.group_spawn()?;
        let stdout = child
            .inner()
            .stdout
            .take()
            .ok_or_else(|| SessionError::Io(std::io::Error::other("streaming command has no stdout")))?;
        drop(spawn_stderr_collector(child.inner().stderr.take(), "stream"));

        tracing::info!(command, "streaming command opened");
        Ok(CommandHandle::with_child(stdout, child))
    }

    async fn read_file(&self, path: &str) -> Result<String, SessionError> {
        let command = format!("cat -- {}", quote_path(path)?);
        let output = self
            .run(&command, None, self.config.connect_timeout() + AUTH_GRACE)
            .await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(SessionError::Remote {
                status: output.exit_status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<(), SessionError> {
        let command = format!("cat > {}", quote_path(path)?);
        let output = self
            .run(
                &command,
                Some(contents.as_bytes()),
                self.config.connect_timeout() + AUTH_GRACE,
            )
            .await?;
        if output.success() {
            tracing::info!(path, bytes = contents.len(), "remote file written");
            Ok(())
        } else {
            Err(SessionError::Remote {
                status: output.exit_status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    async fn close(&self) {
        let mut master = self.master.lock().await;
        let was_connected = self.connected.swap(false, Ordering::SeqCst);

        let program = self
            .program
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(program) = program {
            if !self.control_request(&program, "exit").await {
                tracing::debug!("control socket did not acknowledge exit");
            }
        }
        if let Some(mut stale) = master.take() {
            let _ = stale.child.kill().await;
        }
        if was_connected {
            tracing::info!(host = %self.config.target.host, "ssh session closed");
        }
    }
}

/// Forward a child's stderr to the log and hand back everything it wrote.
fn spawn_stderr_collector<R>(stderr: Option<R>, role: &'static str) -> JoinHandle<String>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut collected = String::new();
        let Some(stderr) = stderr else {
            return collected;
        };
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(role, "ssh: {line}");
            collected.push_str(&line);
            collected.push('\n');
        }
        collected
    })
}

/// Sort an ssh client failure into authentication vs network.
pub(crate) fn classify_failure(stderr: &str) -> SessionError {
    let message = stderr.trim();
    let lower = message.to_ascii_lowercase();
    let detail = if message.is_empty() {
        "ssh exited without diagnostics".to_string()
    } else {
        message.lines().last().unwrap_or(message).to_string()
    };

    if AUTH_MARKERS.iter().any(|marker| lower.contains(marker)) {
        SessionError::Auth(detail)
    } else {
        SessionError::Network(detail)
    }
}
