//! Broadcast fan-out with an independent cursor per subscriber.

use std::sync::{
    Arc, PoisonError, RwLock,
    atomic::{AtomicUsize, Ordering},
};

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use uuid::Uuid;

use crate::StreamEvent;

/// Default per-subscriber buffer before a slow reader starts skipping.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 10_000;

/// Returned by [`EventHub::subscribe`] after the hub has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event hub is closed")]
pub struct HubClosed;

/// Fan-out point between the publisher and connected clients.
///
/// Every subscriber owns a broadcast receiver, so a slow or stalled
/// subscriber only lags itself; the publisher never waits on it.
pub struct EventHub {
    sender: RwLock<Option<broadcast::Sender<StreamEvent>>>,
    active: Arc<AtomicUsize>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl EventHub {
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self {
            sender: RwLock::new(Some(sender)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Deliver an event to every current subscriber.
    ///
    /// Returns the number of subscribers that will see it.
    pub fn publish(&self, event: StreamEvent) -> usize {
        let sender = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        sender
            .as_ref()
            .and_then(|tx| tx.send(event).ok())
            .unwrap_or(0)
    }

    /// Register a new subscriber. It sees only events published from now on.
    ///
    /// # Errors
    /// Returns [`HubClosed`] once [`close`](Self::close) has run.
    pub fn subscribe(&self) -> Result<Subscriber, HubClosed> {
        let sender = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        let receiver = sender.as_ref().ok_or(HubClosed)?.subscribe();
        Ok(Subscriber::new(receiver, Arc::clone(&self.active)))
    }

    /// Stop accepting subscribers and end every subscriber stream once it has
    /// consumed what was already published.
    pub fn close(&self) {
        let sender = self
            .sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_some() {
            tracing::debug!("event hub closed");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Subscribers that have not yet been dropped.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

/// One connected client's delivery cursor.
pub struct Subscriber {
    id: Uuid,
    receiver: broadcast::Receiver<StreamEvent>,
    guard: SubscriberGuard,
}

impl Subscriber {
    fn new(receiver: broadcast::Receiver<StreamEvent>, active: Arc<AtomicUsize>) -> Self {
        let id = Uuid::new_v4();
        active.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(subscriber = %id, "subscriber attached");
        Self {
            id,
            receiver,
            guard: SubscriberGuard { id, active },
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Receive the next event directly.
    ///
    /// Lagged gaps are skipped; returns `None` once the hub is closed and the
    /// backlog is drained.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(subscriber = %self.id, skipped, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Live event stream. Dropping it detaches the subscriber.
    #[must_use]
    pub fn into_stream(self) -> futures::stream::BoxStream<'static, StreamEvent> {
        let Self {
            id,
            receiver,
            guard,
        } = self;

        BroadcastStream::new(receiver)
            .filter_map(move |res| {
                // The guard rides along so the subscriber count drops with the stream.
                let _guard = &guard;
                let event = match res {
                    Ok(event) => Some(event),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::warn!(subscriber = %id, skipped, "subscriber lagged");
                        None
                    }
                };
                futures::future::ready(event)
            })
            .boxed()
    }

    /// SSE stream (requires `sse` feature).
    #[cfg(feature = "sse")]
    #[must_use]
    pub fn sse_stream(
        self,
    ) -> futures::stream::BoxStream<
        'static,
        Result<axum::response::sse::Event, std::convert::Infallible>,
    > {
        self.into_stream()
            .map(|event| Ok(event.to_sse_event()))
            .boxed()
    }
}

struct SubscriberGuard {
    id: Uuid,
    active: Arc<AtomicUsize>,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        tracing::debug!(subscriber = %self.id, "subscriber detached");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::LogEvent;

    fn log(content: &str) -> StreamEvent {
        LogEvent::new("test", content).into()
    }

    #[tokio::test]
    async fn test_two_subscribers_each_get_every_event() {
        let hub = EventHub::new(64);
        let mut a = hub.subscribe().unwrap();
        let mut b = hub.subscribe().unwrap();

        for i in 0..3 {
            assert_eq!(hub.publish(log(&i.to_string())), 2);
        }

        for sub in [&mut a, &mut b] {
            for i in 0..3 {
                let event = sub.recv().await.unwrap();
                assert_eq!(event.as_log().unwrap().content, i.to_string());
            }
        }
    }

    #[tokio::test]
    async fn test_dropping_one_subscriber_does_not_affect_other() {
        let hub = EventHub::new(64);
        let a = hub.subscribe().unwrap();
        let mut b = hub.subscribe().unwrap();
        assert_eq!(hub.subscriber_count(), 2);

        drop(a);
        assert_eq!(hub.subscriber_count(), 1);

        assert_eq!(hub.publish(log("after")), 1);
        let event = tokio::time::timeout(Duration::from_secs(1), b.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.as_log().unwrap().content, "after");
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscriber() {
        let hub = EventHub::new(64);
        let _early = hub.subscribe().unwrap();
        hub.publish(log("before"));

        let mut late = hub.subscribe().unwrap();
        hub.publish(log("after"));
        hub.close();

        assert_eq!(late.recv().await.unwrap().as_log().unwrap().content, "after");
        assert!(late.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_without_blocking() {
        let hub = EventHub::new(4);
        let mut slow = hub.subscribe().unwrap();
        let mut fast = hub.subscribe().unwrap();

        for i in 0..10 {
            hub.publish(log(&i.to_string()));
            assert_eq!(
                fast.recv().await.unwrap().as_log().unwrap().content,
                i.to_string()
            );
        }

        // The slow reader skips ahead to the retained tail.
        let first = slow.recv().await.unwrap();
        assert_eq!(first.as_log().unwrap().content, "6");
    }

    #[tokio::test]
    async fn test_close_ends_streams_after_backlog() {
        let hub = EventHub::new(16);
        let stream = hub.subscribe().unwrap().into_stream();
        hub.publish(log("one"));
        hub.publish(log("two"));
        hub.close();

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert!(hub.subscribe().is_err());
        assert_eq!(hub.subscriber_count(), 0);
    }
}
