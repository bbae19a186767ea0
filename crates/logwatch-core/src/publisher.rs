//! Delivery loop from the distribution queue into the fan-out hub.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::{EventHub, EventQueue};

/// Drain `queue` into `hub` until the queue is closed and empty, then close
/// the hub so subscriber streams finish after their backlog.
///
/// The task resolves to the number of events published.
pub fn spawn_publisher(queue: Arc<EventQueue>, hub: Arc<EventHub>) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut published = 0_u64;
        while let Some(event) = queue.recv().await {
            let receivers = hub.publish(event);
            tracing::trace!(receivers, "event published");
            published += 1;
        }
        hub.close();
        tracing::debug!(published, dropped = queue.dropped(), "publisher drained");
        published
    })
}
