//! Line sinks: where tail workers and the delta watcher deliver lines.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crate::{EventQueue, LogEvent};

/// Receiver of complete lines from a single producer.
pub trait LineSink: Send + Sync {
    /// Deliver one complete line.
    fn emit(&self, line: String);
}

impl<F> LineSink for F
where
    F: Fn(String) + Send + Sync,
{
    fn emit(&self, line: String) {
        self(line);
    }
}

/// Sink that stamps lines with a source label and enqueues them.
pub struct QueueSink {
    source: String,
    queue: Arc<EventQueue>,
    emitted: AtomicU64,
}

impl QueueSink {
    #[must_use]
    pub fn new(source: impl Into<String>, queue: Arc<EventQueue>) -> Self {
        Self {
            source: source.into(),
            queue,
            emitted: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Lines accepted by the queue so far.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

impl LineSink for QueueSink {
    fn emit(&self, line: String) {
        match self.queue.push(LogEvent::new(self.source.as_str(), line)) {
            Ok(()) => {
                self.emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                tracing::trace!(source = %self.source, "queue closed, line discarded");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[tokio::test]
    async fn test_queue_sink_tags_and_counts() {
        let queue = Arc::new(EventQueue::new(8));
        let sink = QueueSink::new("suricata", Arc::clone(&queue));
        sink.emit("flow 1".into());
        sink.emit("flow 2".into());
        assert_eq!(sink.emitted(), 2);

        let event = queue.recv().await.unwrap();
        let log = event.as_log().unwrap();
        assert_eq!(log.source, "suricata");
        assert_eq!(log.content, "flow 1");
    }

    #[test]
    fn test_closed_queue_is_not_counted() {
        let queue = Arc::new(EventQueue::new(8));
        let sink = QueueSink::new("dtrace", Arc::clone(&queue));
        queue.close();
        sink.emit("late".into());
        assert_eq!(sink.emitted(), 0);
    }

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |line: String| seen.lock().unwrap().push(line)
        };
        sink.emit("x".into());
        assert_eq!(*seen.lock().unwrap(), ["x"]);
    }
}
