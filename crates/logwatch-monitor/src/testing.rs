//! In-memory `RemoteSession` for exercising the supervisor and gateway.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use logwatch_core::{CommandHandle, CommandOutput, RemoteSession, SessionError};
use tokio::io::{AsyncWriteExt, DuplexStream};

#[derive(Debug, Clone, Copy)]
pub enum Connect {
    Ok,
    Auth,
    Network,
}

#[derive(Default)]
pub struct ScriptedSession {
    connect_script: Mutex<VecDeque<Connect>>,
    connected: AtomicBool,
    connects: AtomicUsize,
    closes: AtomicUsize,
    streams: Mutex<HashMap<String, Vec<DuplexStream>>>,
    opened: Mutex<Vec<String>>,
    outputs: Mutex<HashMap<String, CommandOutput>>,
    executed: Mutex<Vec<String>>,
    files: Mutex<HashMap<String, String>>,
    connect_delay: Mutex<Option<Duration>>,
    execute_delay: Mutex<Option<Duration>>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue connect outcomes; once exhausted every connect succeeds.
    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = Connect>) {
        self.connect_script.lock().unwrap().extend(outcomes);
    }

    /// Make every later `connect` take `delay` before answering.
    pub fn slow_connects(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = Some(delay);
    }

    /// Make every later `execute` take `delay` before answering.
    pub fn slow_executes(&self, delay: Duration) {
        *self.execute_delay.lock().unwrap() = Some(delay);
    }

    pub fn respond(&self, command: &str, exit_status: i32, stdout: &str, stderr: &str) {
        self.outputs.lock().unwrap().insert(
            command.to_string(),
            CommandOutput {
                exit_status,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        );
    }

    pub fn put_file(&self, path: &str, contents: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), contents.to_string());
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// Streaming commands opened so far, in order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    /// Write to the newest stream opened for `command`.
    pub async fn feed(&self, command: &str, data: &str) {
        let mut stream = {
            let mut streams = self.streams.lock().unwrap();
            streams.get_mut(command).and_then(Vec::pop).expect("no open stream")
        };
        stream.write_all(data.as_bytes()).await.unwrap();
        self.streams
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push(stream);
    }

    /// Close one command's channel, as if the remote process exited.
    pub fn close_stream(&self, command: &str) {
        self.streams.lock().unwrap().remove(command);
    }

    /// Simulate the connection dying: every stream sees EOF.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.streams.lock().unwrap().clear();
    }
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    async fn connect(&self) -> Result<(), SessionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.connect_script.lock().unwrap().pop_front();
        match next.unwrap_or(Connect::Ok) {
            Connect::Ok => {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
            Connect::Auth => Err(SessionError::Auth("Permission denied (publickey)".into())),
            Connect::Network => Err(SessionError::Network("Connection refused".into())),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn execute(&self, command: &str, _timeout: Duration) -> Result<CommandOutput, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        self.executed.lock().unwrap().push(command.to_string());
        let delay = *self.execute_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .outputs
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or_default())
    }

    async fn open_streaming_command(&self, command: &str) -> Result<CommandHandle, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let (remote, local) = tokio::io::duplex(4096);
        self.streams
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push(remote);
        self.opened.lock().unwrap().push(command.to_string());
        Ok(CommandHandle::new(local))
    }

    async fn read_file(&self, path: &str) -> Result<String, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        self.file(path).ok_or_else(|| SessionError::Remote {
            status: 1,
            stderr: format!("cat: {path}: No such file or directory"),
        })
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        self.put_file(path, contents);
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.drop_connection();
    }
}
