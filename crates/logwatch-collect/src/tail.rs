//! Remote tail workers.
//!
//! A worker owns one streaming command handle and turns its output into
//! lines for a sink. It runs until stopped, until the stream closes, or
//! until a read fails.

use std::{sync::Arc, time::Duration};

use logwatch_core::{CommandHandle, LineSink};
use tokio::{io::AsyncReadExt, sync::oneshot, task::JoinHandle};

use crate::lines::{DEFAULT_MAX_LINE, LineScanner};

/// Worker tuning.
#[derive(Debug, Clone, Copy)]
pub struct TailConfig {
    /// Upper bound on a single read; expiry just means the stream was idle.
    pub read_timeout: Duration,
    pub chunk_size: usize,
    pub max_line: usize,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            chunk_size: 8 * 1024,
            max_line: DEFAULT_MAX_LINE,
        }
    }
}

/// Why a worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailExit {
    /// A stop was requested.
    Stopped,
    /// The remote side closed the stream.
    Closed,
    /// A read failed.
    Failed,
}

/// Handle to a running tail worker.
#[derive(Debug)]
pub struct TailHandle {
    source: String,
    command: String,
    stop_tx: Option<oneshot::Sender<()>>,
    join: JoinHandle<TailExit>,
}

impl TailHandle {
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// False once the worker has returned.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// Ask the worker to stop. Idempotent; does not wait.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Wait for the worker to finish on its own.
    pub async fn join(self) -> TailExit {
        match self.join.await {
            Ok(exit) => exit,
            Err(e) => {
                tracing::error!(source = %self.source, "tail worker panicked: {e}");
                TailExit::Failed
            }
        }
    }

    /// Stop and wait.
    pub async fn shutdown(mut self) -> TailExit {
        self.stop();
        self.join().await
    }
}

/// Start a worker over an already opened streaming command.
pub fn spawn_tail(
    source: impl Into<String>,
    command: impl Into<String>,
    handle: CommandHandle,
    sink: Arc<dyn LineSink>,
    config: TailConfig,
) -> TailHandle {
    let source = source.into();
    let command = command.into();
    let (stop_tx, stop_rx) = oneshot::channel();

    let task_source = source.clone();
    let join = tokio::spawn(async move {
        tracing::info!(source = %task_source, "tail worker started");
        let exit = run_tail(handle, sink.as_ref(), config, stop_rx).await;
        tracing::info!(source = %task_source, ?exit, "tail worker finished");
        exit
    });

    TailHandle {
        source,
        command,
        stop_tx: Some(stop_tx),
        join,
    }
}

async fn run_tail(
    mut handle: CommandHandle,
    sink: &dyn LineSink,
    config: TailConfig,
    mut stop_rx: oneshot::Receiver<()>,
) -> TailExit {
    let mut scanner = LineScanner::new(config.max_line);
    let mut buf = vec![0u8; config.chunk_size.max(1)];

    let exit = loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break TailExit::Stopped,
            read = tokio::time::timeout(config.read_timeout, handle.output().read(&mut buf)) => {
                match read {
                    // Idle; poll again.
                    Err(_) => {}
                    Ok(Ok(0)) => {
                        sink.emit("read error: remote stream closed".to_string());
                        break TailExit::Closed;
                    }
                    Ok(Ok(n)) => {
                        for line in scanner.push(&buf[..n]) {
                            sink.emit(line);
                        }
                    }
                    Ok(Err(e)) => {
                        tracing::warn!("tail read failed: {e}");
                        sink.emit(format!("read error: {e}"));
                        break TailExit::Failed;
                    }
                }
            }
        }
    };

    if scanner.pending() > 0 {
        tracing::debug!(bytes = scanner.pending(), "discarding unterminated output");
    }
    handle.terminate().await;
    exit
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        pin::Pin,
        sync::Mutex,
        task::{Context, Poll},
    };

    use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};

    use super::*;

    fn collecting_sink() -> (Arc<dyn LineSink>, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let out = lines.clone();
        let sink: Arc<dyn LineSink> = Arc::new(move |line: String| out.lock().unwrap().push(line));
        (sink, lines)
    }

    async fn wait_for(lines: &Arc<Mutex<Vec<String>>>, n: usize) {
        while lines.lock().unwrap().len() < n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_stream_is_not_an_error() {
        let (mut remote, local) = tokio::io::duplex(256);
        let (sink, lines) = collecting_sink();
        let tail = spawn_tail("suricata", "tail -f x", CommandHandle::new(local), sink, TailConfig::default());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(tail.is_running());
        assert!(lines.lock().unwrap().is_empty());

        remote.write_all(b"ET POLICY curl\r\n").await.unwrap();
        wait_for(&lines, 1).await;
        assert_eq!(tail.shutdown().await, TailExit::Stopped);
        assert_eq!(*lines.lock().unwrap(), ["ET POLICY curl"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_partial_line() {
        let (mut remote, local) = tokio::io::duplex(256);
        let (sink, lines) = collecting_sink();
        let tail = spawn_tail("s", "cmd", CommandHandle::new(local), sink, TailConfig::default());

        remote.write_all(b"one\ntwo\nthr").await.unwrap();
        wait_for(&lines, 2).await;
        assert_eq!(tail.shutdown().await, TailExit::Stopped);
        assert_eq!(*lines.lock().unwrap(), ["one", "two"]);
    }

    #[tokio::test]
    async fn test_stream_close_emits_one_diagnostic() {
        let (mut remote, local) = tokio::io::duplex(256);
        let (sink, lines) = collecting_sink();
        let tail = spawn_tail("s", "cmd", CommandHandle::new(local), sink, TailConfig::default());

        remote.write_all(b"last words\n").await.unwrap();
        drop(remote);

        assert_eq!(tail.join().await, TailExit::Closed);
        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "last words");
        assert!(lines[1].starts_with("read error:"));
    }

    #[tokio::test]
    async fn test_read_failure_emits_one_diagnostic() {
        let (sink, lines) = collecting_sink();
        let tail = spawn_tail("s", "cmd", CommandHandle::new(FailingReader), sink, TailConfig::default());

        assert_eq!(tail.join().await, TailExit::Failed);
        assert_eq!(*lines.lock().unwrap(), ["read error: connection reset"]);
    }

    #[tokio::test]
    async fn test_workers_are_independent() {
        let (mut remote_a, local_a) = tokio::io::duplex(256);
        let (mut remote_b, local_b) = tokio::io::duplex(256);
        let (sink_a, lines_a) = collecting_sink();
        let (sink_b, lines_b) = collecting_sink();
        let a = spawn_tail("a", "cmd a", CommandHandle::new(local_a), sink_a, TailConfig::default());
        let b = spawn_tail("b", "cmd b", CommandHandle::new(local_b), sink_b, TailConfig::default());

        drop(remote_a);
        assert_eq!(a.join().await, TailExit::Closed);

        remote_b.write_all(b"still here\n").await.unwrap();
        wait_for(&lines_b, 1).await;
        assert!(b.is_running());
        assert_eq!(b.shutdown().await, TailExit::Stopped);
        assert_eq!(lines_a.lock().unwrap().len(), 1);
        assert_eq!(*lines_b.lock().unwrap(), ["still here"]);
    }
}
