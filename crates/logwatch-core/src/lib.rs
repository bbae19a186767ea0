//! Core building blocks for live log monitoring.
//!
//! This crate provides:
//! - `LogEvent` / `StatusEvent` / `StreamEvent` - the event model
//! - `EventQueue` - ordered, bounded, drop-oldest distribution queue
//! - `EventHub` - broadcast fan-out with one cursor per subscriber
//! - `spawn_publisher` - drains the queue into the hub
//! - `LineSink` / `QueueSink` - where producers put their lines
//! - `RemoteSession` - the seam to the remote host

pub mod event;
pub mod hub;
pub mod publisher;
pub mod queue;
pub mod sink;
pub mod traits;

pub use event::{ConnectionState, LogEvent, StatusEvent, StreamEvent};
pub use hub::{EventHub, HubClosed, Subscriber};
pub use publisher::spawn_publisher;
pub use queue::{EventQueue, QueueClosed};
pub use sink::{LineSink, QueueSink};
pub use traits::{CommandHandle, CommandOutput, RemoteSession, SessionError};
