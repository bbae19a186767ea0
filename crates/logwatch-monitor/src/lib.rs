//! Supervision of the log pipeline.
//!
//! `Monitor` owns every running producer and the publisher, reconnects the
//! remote session with backoff, and tears everything down in order.
//! `MonitorContext` is the cheap, cloneable view handed to request handlers.
//! `RuleGateway` reads, writes and reloads the remote rule file.

pub mod config;
pub mod context;
pub mod error;
pub mod rules;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{MonitorConfig, ReconnectPolicy, TailSpec, WatchFile, WatchSpec};
pub use context::{MonitorContext, SourceKind, SourceStatus, StatusSnapshot};
pub use error::MonitorError;
pub use rules::{ReloadOutcome, RuleError, RuleGateway, RulesConfig, classify_reload};
pub use supervisor::Monitor;
