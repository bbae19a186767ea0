//! Filesystem-notification driven delta reads for one directory.

use std::{
    collections::HashMap,
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use logwatch_core::LineSink;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::{JoinHandle, JoinSet},
};

use crate::delta::WatchTarget;

/// Watcher setup error.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("{path} is not directly inside the watched directory {dir}")]
    OutsideDirectory { path: PathBuf, dir: PathBuf },
    #[error("{0} is registered twice")]
    Duplicate(PathBuf),
}

struct Entry {
    target: Arc<Mutex<WatchTarget>>,
    sink: Arc<dyn LineSink>,
}

/// Running watcher over one directory and its registered targets.
pub struct DeltaWatcher {
    dir: PathBuf,
    stop_tx: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl std::fmt::Debug for DeltaWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaWatcher")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl DeltaWatcher {
    /// Subscribe to `dir` and start dispatching changes to `targets`.
    ///
    /// Every target must live directly in `dir`.
    ///
    /// # Errors
    /// Returns error if a target is misplaced or the subscription fails.
    pub fn start(
        dir: &Path,
        targets: Vec<(WatchTarget, Arc<dyn LineSink>)>,
    ) -> Result<Self, WatchError> {
        let dir = std::fs::canonicalize(dir)?;

        let mut entries = HashMap::<OsString, Entry>::new();
        for (target, sink) in targets {
            let parent = target
                .path()
                .parent()
                .map(std::fs::canonicalize)
                .transpose()?;
            let name = target.path().file_name().map(ToOwned::to_owned);
            let (Some(parent), Some(name)) = (parent, name) else {
                return Err(WatchError::OutsideDirectory {
                    path: target.path().to_path_buf(),
                    dir,
                });
            };
            if parent != dir {
                return Err(WatchError::OutsideDirectory {
                    path: target.path().to_path_buf(),
                    dir,
                });
            }
            if entries.contains_key(&name) {
                return Err(WatchError::Duplicate(target.path().to_path_buf()));
            }
            entries.insert(
                name,
                Entry {
                    target: Arc::new(Mutex::new(target)),
                    sink,
                },
            );
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = recommended_watcher(move |event| {
            let _ = event_tx.send(event);
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(dir = %dir.display(), targets = entries.len(), "delta watcher started");

        let (stop_tx, stop_rx) = oneshot::channel();
        let join = tokio::spawn(watch_loop(watcher, entries, event_rx, stop_rx));

        Ok(Self {
            dir,
            stop_tx: Some(stop_tx),
            join,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drop the subscription, then wait for in-flight reads.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.join.await {
            tracing::error!("delta watcher task failed: {e}");
        }
        tracing::info!(dir = %self.dir.display(), "delta watcher stopped");
    }
}

const fn is_relevant(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

async fn watch_loop(
    watcher: RecommendedWatcher,
    entries: HashMap<OsString, Entry>,
    mut event_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut reads = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            Some(done) = reads.join_next(), if !reads.is_empty() => {
                if let Err(e) = done {
                    tracing::error!("delta read task failed: {e}");
                }
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant(&event.kind) {
                    continue;
                }
                for path in &event.paths {
                    let Some(entry) = path.file_name().and_then(|name| entries.get(name)) else {
                        continue;
                    };
                    let target = entry.target.clone();
                    let sink = entry.sink.clone();
                    reads.spawn_blocking(move || read_target(&target, sink.as_ref()));
                }
            }
        }
    }

    drop(watcher);
    while let Some(done) = reads.join_next().await {
        if let Err(e) = done {
            tracing::error!("delta read task failed: {e}");
        }
    }
}

fn read_target(target: &Mutex<WatchTarget>, sink: &dyn LineSink) {
    let mut target = target.lock().unwrap_or_else(PoisonError::into_inner);
    match target.read_delta() {
        Ok(lines) => {
            if !lines.is_empty() {
                tracing::trace!(source = target.source(), count = lines.len(), "delta lines");
            }
            for line in lines {
                sink.emit(line);
            }
        }
        // Rotated away; the next create event picks it up again.
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %target.path().display(), "watched file missing");
        }
        Err(e) => {
            tracing::warn!(path = %target.path().display(), "delta read failed: {e}");
            sink.emit(format!("read error: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::OpenOptions, io::Write, time::Duration};

    use super::*;

    type Lines = Arc<Mutex<Vec<String>>>;

    fn collecting_sink() -> (Arc<dyn LineSink>, Lines) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let out = lines.clone();
        let sink: Arc<dyn LineSink> = Arc::new(move |line: String| out.lock().unwrap().push(line));
        (sink, lines)
    }

    fn append(path: &Path, data: &str) {
        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(data.as_bytes()).unwrap();
    }

    async fn wait_for(lines: &Lines, n: usize) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while lines.lock().unwrap().len() < n {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("lines did not arrive");
    }

    #[tokio::test]
    async fn test_appends_are_delivered_per_target() {
        let dir = tempfile::tempdir().unwrap();
        let dtrace = dir.path().join("dtrace.log");
        let other = dir.path().join("other.log");
        std::fs::write(&dtrace, "old\n").unwrap();

        let (sink_a, lines_a) = collecting_sink();
        let (sink_b, lines_b) = collecting_sink();
        let watcher = DeltaWatcher::start(
            dir.path(),
            vec![
                (WatchTarget::starting_at_end(&dtrace, "dtrace").unwrap(), sink_a),
                (WatchTarget::starting_at_end(&other, "other").unwrap(), sink_b),
            ],
        )
        .unwrap();

        append(&dtrace, "syscall open\nsyscall read\n");
        wait_for(&lines_a, 2).await;
        append(&other, "x\n");
        wait_for(&lines_b, 1).await;
        watcher.stop().await;

        assert_eq!(*lines_a.lock().unwrap(), ["syscall open", "syscall read"]);
        assert_eq!(*lines_b.lock().unwrap(), ["x"]);
    }

    #[tokio::test]
    async fn test_unregistered_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let watched = dir.path().join("watched.log");
        let (sink, lines) = collecting_sink();
        let watcher = DeltaWatcher::start(
            dir.path(),
            vec![(WatchTarget::starting_at_end(&watched, "w").unwrap(), sink)],
        )
        .unwrap();

        std::fs::write(dir.path().join("noise.log"), "ignored\n").unwrap();
        append(&watched, "kept\n");
        wait_for(&lines, 1).await;
        watcher.stop().await;

        assert_eq!(*lines.lock().unwrap(), ["kept"]);
    }

    #[tokio::test]
    async fn test_target_outside_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let stray = elsewhere.path().join("stray.log");
        let (sink, _) = collecting_sink();

        let err = DeltaWatcher::start(
            dir.path(),
            vec![(WatchTarget::starting_at_end(&stray, "stray").unwrap(), sink)],
        )
        .unwrap_err();
        assert!(matches!(err, WatchError::OutsideDirectory { .. }));
    }
}
