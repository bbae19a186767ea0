//! Events carried by the live stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line of log output from a named source.
///
/// Serializes to the wire shape `{timestamp, source, content}` with an
/// RFC 3339 timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Arrival time.
    pub timestamp: DateTime<Utc>,
    /// Source label, e.g. `dtrace` or `suricata`.
    pub source: String,
    /// Line text, already trimmed.
    pub content: String,
}

impl LogEvent {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self::at(Utc::now(), source, content)
    }

    /// Create an event with an explicit timestamp.
    #[must_use]
    pub fn at(
        timestamp: DateTime<Utc>,
        source: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            source: source.into(),
            content: content.into(),
        }
    }
}

/// Remote connection state as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Monitoring not started.
    Idle,
    /// First connection attempt in progress.
    Connecting,
    /// Session established and tails running.
    Connected,
    /// Session lost.
    Disconnected,
    /// Retrying after a loss or a network failure.
    Reconnecting,
    /// Gave up: authentication failed or retries exhausted.
    Failed,
    /// Monitoring stopped on request.
    Stopped,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit status notification for connection indicators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub timestamp: DateTime<Utc>,
    pub state: ConnectionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StatusEvent {
    #[must_use]
    pub fn new(state: ConnectionState, detail: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            state,
            detail,
        }
    }
}

/// Anything that travels through the queue and the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamEvent {
    Log(LogEvent),
    Status(StatusEvent),
}

impl StreamEvent {
    /// The contained log event, if any.
    #[must_use]
    pub const fn as_log(&self) -> Option<&LogEvent> {
        match self {
            Self::Log(log) => Some(log),
            Self::Status(_) => None,
        }
    }

    /// Convert to an SSE event.
    ///
    /// Log events are unnamed messages whose data is the bare
    /// `{timestamp, source, content}` object; status events use the
    /// `status` event name.
    #[cfg(feature = "sse")]
    #[must_use]
    pub fn to_sse_event(&self) -> axum::response::sse::Event {
        use axum::response::sse::Event;

        let encoded = match self {
            Self::Log(log) => Event::default().json_data(log),
            Self::Status(status) => Event::default().event("status").json_data(status),
        };
        encoded.unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
    }
}

impl From<LogEvent> for StreamEvent {
    fn from(event: LogEvent) -> Self {
        Self::Log(event)
    }
}

impl From<StatusEvent> for StreamEvent {
    fn from(event: StatusEvent) -> Self {
        Self::Status(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_wire_shape() {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = LogEvent::at(ts, "dtrace", "probe fired");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["source"], "dtrace");
        assert_eq!(value["content"], "probe fired");
        assert_eq!(value["timestamp"], "2024-05-01T12:00:00Z");
        assert_eq!(value.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_status_event_omits_empty_detail() {
        let event = StatusEvent::new(ConnectionState::Connected, None);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"state\":\"connected\""));
        assert!(!json.contains("detail"));
    }
}
