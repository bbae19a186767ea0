//! Shared read-mostly view of a running monitor.

use std::sync::Arc;

use logwatch_collect::LogArchive;
use logwatch_core::{ConnectionState, EventHub, EventQueue, QueueSink, RemoteSession};
use serde::Serialize;
use tokio::sync::watch;

/// Where a source's lines come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Remote,
    Local,
}

#[derive(Clone)]
pub(crate) struct SourceCounter {
    pub(crate) kind: SourceKind,
    pub(crate) sink: Arc<QueueSink>,
}

/// Per-source line count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStatus {
    pub source: String,
    pub kind: SourceKind,
    pub emitted: u64,
}

/// Point-in-time pipeline status.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: ConnectionState,
    pub sources: Vec<SourceStatus>,
    pub enqueued: u64,
    pub dropped: u64,
    pub queued: usize,
    pub subscribers: usize,
}

struct Inner {
    session: Arc<dyn RemoteSession>,
    queue: Arc<EventQueue>,
    hub: Arc<EventHub>,
    archive: Option<Arc<LogArchive>>,
    state: watch::Receiver<ConnectionState>,
    sources: Vec<SourceCounter>,
}

/// Cloneable handle to the pieces request handlers need.
#[derive(Clone)]
pub struct MonitorContext {
    inner: Arc<Inner>,
}

impl MonitorContext {
    pub(crate) fn new(
        session: Arc<dyn RemoteSession>,
        queue: Arc<EventQueue>,
        hub: Arc<EventHub>,
        archive: Option<Arc<LogArchive>>,
        state: watch::Receiver<ConnectionState>,
        sources: Vec<SourceCounter>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                queue,
                hub,
                archive,
                state,
                sources,
            }),
        }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<dyn RemoteSession> {
        &self.inner.session
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<EventHub> {
        &self.inner.hub
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.inner.queue
    }

    #[must_use]
    pub fn archive(&self) -> Option<&Arc<LogArchive>> {
        self.inner.archive.as_ref()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    #[must_use]
    pub fn sources(&self) -> Vec<SourceStatus> {
        self.inner
            .sources
            .iter()
            .map(|counter| SourceStatus {
                source: counter.sink.source().to_string(),
                kind: counter.kind,
                emitted: counter.sink.emitted(),
            })
            .collect()
    }

    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state(),
            sources: self.sources(),
            enqueued: self.inner.queue.enqueued(),
            dropped: self.inner.queue.dropped(),
            queued: self.inner.queue.len(),
            subscribers: self.inner.hub.subscriber_count(),
        }
    }
}

impl std::fmt::Debug for MonitorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorContext")
            .field("state", &self.state())
            .field("sources", &self.inner.sources.len())
            .finish_non_exhaustive()
    }
}
