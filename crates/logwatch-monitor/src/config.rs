//! What to monitor and how persistently.

use std::{path::PathBuf, time::Duration};

use logwatch_collect::TailConfig;
use serde::{Deserialize, Serialize};

/// One remote source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailSpec {
    /// Label stamped on every line.
    pub source: String,
    /// Long-running command, e.g. `tail -f /var/log/suricata/suricata.log`.
    pub command: String,
    /// One-shot command whose output is emitted before streaming starts.
    #[serde(default)]
    pub backfill: Option<String>,
}

/// One local file inside the watched directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchFile {
    /// File name relative to the watched directory.
    pub file: String,
    pub source: String,
}

/// Local files to follow, all in one directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSpec {
    pub dir: PathBuf,
    #[serde(default)]
    pub files: Vec<WatchFile>,
}

/// Bounded exponential backoff for reconnecting the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl ReconnectPolicy {
    /// Wait before attempt `attempt` (1-based): doubles each time, capped.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_delay_ms
            .max(1)
            .saturating_mul(factor)
            .min(self.max_delay_ms.max(1));
        Duration::from_millis(ms)
    }
}

/// Monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub tails: Vec<TailSpec>,
    pub watch: Option<WatchSpec>,
    /// Read timeout of tail workers; also the supervisor's health-check period.
    pub read_timeout_ms: u64,
    pub backfill_timeout_secs: u64,
    pub reconnect: ReconnectPolicy,
    /// Period of the per-source status log line.
    pub status_interval_secs: u64,
    pub queue_capacity: usize,
    pub subscriber_buffer: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tails: Vec::new(),
            watch: None,
            read_timeout_ms: 1_000,
            backfill_timeout_secs: 30,
            reconnect: ReconnectPolicy::default(),
            status_interval_secs: 60,
            queue_capacity: logwatch_core::queue::DEFAULT_CAPACITY,
            subscriber_buffer: logwatch_core::hub::DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

impl MonitorConfig {
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(if self.read_timeout_ms == 0 { 1 } else { self.read_timeout_ms })
    }

    #[must_use]
    pub const fn backfill_timeout(&self) -> Duration {
        Duration::from_secs(self.backfill_timeout_secs)
    }

    #[must_use]
    pub const fn status_interval(&self) -> Duration {
        Duration::from_secs(if self.status_interval_secs == 0 { 1 } else { self.status_interval_secs })
    }

    #[must_use]
    pub fn tail_config(&self) -> TailConfig {
        TailConfig {
            read_timeout: self.read_timeout(),
            ..TailConfig::default()
        }
    }
}
