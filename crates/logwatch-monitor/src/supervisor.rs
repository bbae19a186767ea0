//! Pipeline lifecycle: startup, reconnection and ordered shutdown.

use std::{sync::Arc, time::Duration};

use logwatch_collect::{
    DeltaWatcher, LineScanner, LogArchive, TailConfig, TailHandle, WatchTarget, spawn_archiver,
    spawn_tail,
};
use logwatch_core::{
    CommandHandle, ConnectionState, EventHub, EventQueue, LineSink, QueueSink, RemoteSession,
    SessionError, StatusEvent, spawn_publisher,
};
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};

use crate::{
    config::{MonitorConfig, ReconnectPolicy, TailSpec},
    context::{MonitorContext, SourceCounter, SourceKind},
    error::MonitorError,
};

/// Publishes connection state to watchers and into the live stream.
struct StatusReporter {
    queue: Arc<EventQueue>,
    state: watch::Sender<ConnectionState>,
}

impl StatusReporter {
    fn set(&self, state: ConnectionState, detail: Option<String>) {
        self.state.send_replace(state);
        match &detail {
            Some(detail) => tracing::info!(%state, %detail, "connection state changed"),
            None => tracing::info!(%state, "connection state changed"),
        }
        if self.queue.push(StatusEvent::new(state, detail)).is_err() {
            tracing::debug!(%state, "status not queued, pipeline closed");
        }
    }
}

/// A running log pipeline.
pub struct Monitor {
    context: MonitorContext,
    status: Arc<StatusReporter>,
    shutdown_tx: watch::Sender<bool>,
    remote: JoinHandle<()>,
    ticker: JoinHandle<()>,
    watcher: Option<DeltaWatcher>,
    publisher: JoinHandle<u64>,
    archiver: Option<JoinHandle<u64>>,
}

impl Monitor {
    /// Connect and start every producer, the publisher and the archiver.
    ///
    /// A network failure on the first connect is retried in the background;
    /// an authentication failure is returned and nothing is left running.
    ///
    /// # Errors
    /// Returns error on authentication failure or if the local watcher
    /// cannot be set up.
    pub async fn start(
        config: MonitorConfig,
        session: Arc<dyn RemoteSession>,
        archive: Option<Arc<LogArchive>>,
    ) -> Result<Self, MonitorError> {
        let queue = Arc::new(EventQueue::new(config.queue_capacity));
        let hub = Arc::new(EventHub::new(config.subscriber_buffer));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let status = Arc::new(StatusReporter {
            queue: Arc::clone(&queue),
            state: state_tx,
        });

        let mut counters = Vec::new();
        let tails: Vec<(TailSpec, Arc<QueueSink>)> = config
            .tails
            .iter()
            .map(|spec| {
                let sink = Arc::new(QueueSink::new(spec.source.as_str(), Arc::clone(&queue)));
                counters.push(SourceCounter {
                    kind: SourceKind::Remote,
                    sink: Arc::clone(&sink),
                });
                (spec.clone(), sink)
            })
            .collect();

        let mut targets = Vec::new();
        if let Some(watch) = &config.watch {
            for file in &watch.files {
                let target = WatchTarget::starting_at_end(watch.dir.join(&file.file), file.source.as_str())?;
                let sink = Arc::new(QueueSink::new(file.source.as_str(), Arc::clone(&queue)));
                counters.push(SourceCounter {
                    kind: SourceKind::Local,
                    sink: Arc::clone(&sink),
                });
                targets.push((target, sink as Arc<dyn LineSink>));
            }
        }

        status.set(ConnectionState::Connecting, None);
        let connected = match session.connect().await {
            Ok(()) => true,
            Err(e) if e.is_auth() => {
                status.set(ConnectionState::Failed, Some(e.to_string()));
                tracing::error!("authentication failed, not retrying: {e}");
                return Err(e.into());
            }
            Err(e) => {
                tracing::warn!("initial connect failed, will retry: {e}");
                false
            }
        };

        let watcher = match (&config.watch, targets.is_empty()) {
            (Some(watch), false) => match DeltaWatcher::start(&watch.dir, targets) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    session.close().await;
                    return Err(e.into());
                }
            },
            _ => None,
        };

        let archiver = archive.as_ref().and_then(|archive| {
            hub.subscribe()
                .ok()
                .map(|subscriber| spawn_archiver(Arc::clone(archive), subscriber))
        });
        let publisher = spawn_publisher(Arc::clone(&queue), Arc::clone(&hub));

        let context = MonitorContext::new(
            Arc::clone(&session),
            queue,
            hub,
            archive,
            state_rx,
            counters,
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let supervisor = RemoteSupervisor {
            session,
            tails,
            tail_config: config.tail_config(),
            backfill_timeout: config.backfill_timeout(),
            health_interval: config.read_timeout(),
            policy: config.reconnect,
            status: Arc::clone(&status),
            shutdown: shutdown_rx.clone(),
        };
        let remote = tokio::spawn(supervisor.run(connected));
        let ticker = tokio::spawn(status_ticker(
            context.clone(),
            config.status_interval(),
            shutdown_rx,
        ));

        tracing::info!(
            tails = config.tails.len(),
            watched = watcher.is_some(),
            archived = archiver.is_some(),
            "monitor started"
        );

        Ok(Self {
            context,
            status,
            shutdown_tx,
            remote,
            ticker,
            watcher,
            publisher,
            archiver,
        })
    }

    #[must_use]
    pub fn context(&self) -> MonitorContext {
        self.context.clone()
    }

    /// Shut down in order: tails, watcher, publisher, session.
    ///
    /// Returns once every task has been joined; subscriber streams end after
    /// their backlog.
    pub async fn stop(self) {
        tracing::info!("stopping monitor");
        self.shutdown_tx.send_replace(true);

        if let Err(e) = self.remote.await {
            tracing::error!("remote supervisor failed: {e}");
        }
        if let Some(watcher) = self.watcher {
            watcher.stop().await;
        }
        if let Err(e) = self.ticker.await {
            tracing::error!("status ticker failed: {e}");
        }

        self.status.set(ConnectionState::Stopped, None);
        self.context.queue().close();
        match self.publisher.await {
            Ok(published) => tracing::info!(published, "publisher drained"),
            Err(e) => tracing::error!("publisher failed: {e}"),
        }
        if let Some(archiver) = self.archiver {
            if let Err(e) = archiver.await {
                tracing::error!("archiver failed: {e}");
            }
        }

        self.context.session().close().await;
        tracing::info!("monitor stopped");
    }
}

enum WatchOutcome {
    Shutdown,
    ConnectionLost(String),
}

struct RemoteSupervisor {
    session: Arc<dyn RemoteSession>,
    tails: Vec<(TailSpec, Arc<QueueSink>)>,
    tail_config: TailConfig,
    backfill_timeout: Duration,
    health_interval: Duration,
    policy: ReconnectPolicy,
    status: Arc<StatusReporter>,
    shutdown: watch::Receiver<bool>,
}

impl RemoteSupervisor {
    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn run(self, mut connected: bool) {
        // Backfill runs on the first session only.
        let mut backfill = true;
        loop {
            if self.stopping() {
                return;
            }
            if !connected && !self.reconnect().await {
                return;
            }
            self.status.set(ConnectionState::Connected, None);

            let (handles, early) = self.start_tails(backfill).await;
            backfill = false;
            let outcome = match early {
                Some(outcome) => {
                    stop_all(handles).await;
                    outcome
                }
                None => self.watch_tails(handles).await,
            };
            match outcome {
                WatchOutcome::Shutdown => return,
                WatchOutcome::ConnectionLost(detail) => {
                    self.status.set(ConnectionState::Disconnected, Some(detail));
                    connected = false;
                }
            }
        }
    }

    /// Retry `connect` with backoff. False when giving up or shutting down.
    async fn reconnect(&self) -> bool {
        let max = self.policy.max_attempts;
        for attempt in 1..=max {
            self.status.set(
                ConnectionState::Reconnecting,
                Some(format!("attempt {attempt}/{max}")),
            );
            let delay = self.policy.delay(attempt);
            let result = tokio::select! {
                biased;
                () = shutdown_requested(self.shutdown.clone()) => return false,
                result = async {
                    tokio::time::sleep(delay).await;
                    self.session.connect().await
                } => result,
            };

            match result {
                Ok(()) => return true,
                Err(e) if e.is_auth() => {
                    self.status.set(ConnectionState::Failed, Some(e.to_string()));
                    return false;
                }
                Err(e) => tracing::warn!(attempt, "reconnect failed: {e}"),
            }
        }
        self.status.set(
            ConnectionState::Failed,
            Some(format!("gave up after {max} attempts")),
        );
        false
    }

    /// Open every tail in order. Returns the workers started so far and,
    /// when startup was cut short, why.
    async fn start_tails(&self, backfill: bool) -> (Vec<TailHandle>, Option<WatchOutcome>) {
        let mut handles = Vec::with_capacity(self.tails.len());
        for (spec, sink) in &self.tails {
            let opened = tokio::select! {
                biased;
                () = shutdown_requested(self.shutdown.clone()) => {
                    return (handles, Some(WatchOutcome::Shutdown));
                }
                opened = self.open_tail(spec, sink, backfill) => opened,
            };
            match opened {
                Ok(handle) => handles.push(spawn_tail(
                    spec.source.as_str(),
                    spec.command.as_str(),
                    handle,
                    Arc::clone(sink) as Arc<dyn LineSink>,
                    self.tail_config,
                )),
                Err(e) => {
                    tracing::warn!(source = %spec.source, "failed to open tail: {e}");
                    sink.emit(format!("read error: {e}"));
                    if e.is_network() {
                        return (handles, Some(WatchOutcome::ConnectionLost(e.to_string())));
                    }
                }
            }
        }
        (handles, None)
    }

    async fn open_tail(
        &self,
        spec: &TailSpec,
        sink: &QueueSink,
        backfill: bool,
    ) -> Result<CommandHandle, SessionError> {
        if let (true, Some(command)) = (backfill, &spec.backfill) {
            self.run_backfill(&spec.source, command, sink).await;
        }
        self.session.open_streaming_command(&spec.command).await
    }

    async fn run_backfill(&self, source: &str, command: &str, sink: &QueueSink) {
        match self.session.execute(command, self.backfill_timeout).await {
            Ok(output) => {
                let mut scanner = LineScanner::default();
                let mut lines = scanner.push(output.stdout.as_bytes());
                lines.extend(scanner.push(b"\n"));
                tracing::debug!(source, lines = lines.len(), "backfill complete");
                for line in lines {
                    sink.emit(line);
                }
                if !output.success() {
                    tracing::debug!(
                        source,
                        exit_status = output.exit_status,
                        stderr = %output.stderr.trim(),
                        "backfill exited non-zero"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(source, "backfill failed: {e}");
                sink.emit(format!("backfill error: {e}"));
            }
        }
    }

    /// Reap finished workers and check the session every tick, until
    /// shutdown or until the session is gone.
    async fn watch_tails(&self, mut handles: Vec<TailHandle>) -> WatchOutcome {
        let mut tick = tokio::time::interval(self.health_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                biased;
                () = shutdown_requested(self.shutdown.clone()) => break WatchOutcome::Shutdown,
                _ = tick.tick() => {}
            }

            let (running, finished): (Vec<_>, Vec<_>) =
                handles.into_iter().partition(TailHandle::is_running);
            handles = running;
            for handle in finished {
                let source = handle.source().to_string();
                let exit = handle.join().await;
                tracing::info!(%source, ?exit, "tail ended");
            }

            // Probed even when no tail is left running.
            let alive = tokio::select! {
                biased;
                () = shutdown_requested(self.shutdown.clone()) => break WatchOutcome::Shutdown,
                alive = self.session.is_alive() => alive,
            };
            if !alive {
                break WatchOutcome::ConnectionLost("remote session lost".to_string());
            }
        };
        stop_all(handles).await;
        outcome
    }
}

/// Resolves once shutdown is requested or the monitor is gone.
async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Signal every worker first so they wind down together, then join.
async fn stop_all(mut handles: Vec<TailHandle>) {
    for handle in &mut handles {
        handle.stop();
    }
    for handle in handles {
        handle.join().await;
    }
}

async fn status_ticker(
    context: MonitorContext,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                let snapshot = context.snapshot();
                for source in &snapshot.sources {
                    tracing::info!(
                        source = %source.source,
                        kind = ?source.kind,
                        emitted = source.emitted,
                        "source status"
                    );
                }
                tracing::info!(
                    state = %snapshot.state,
                    enqueued = snapshot.enqueued,
                    dropped = snapshot.dropped,
                    subscribers = snapshot.subscribers,
                    "pipeline status"
                );
            }
        }
    }
}
