//! JSON bodies exchanged with browser clients.
//!
//! Every response carries `success`; failures add `error`.

use logwatch_core::LogEvent;
use logwatch_monitor::{ReloadOutcome, StatusSnapshot};
use serde::{Deserialize, Serialize};

/// History lines per source when the client does not ask.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
/// Upper bound on history lines per source.
pub const MAX_HISTORY_LIMIT: usize = 1_000;

/// `?limit=N` for the history endpoint.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

impl HistoryQuery {
    /// Requested limit, defaulted and clamped to `1..=MAX_HISTORY_LIMIT`.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub logs: Vec<LogEvent>,
}

/// Rule text, both as request and response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesBody {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesResponse {
    pub success: bool,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveResponse {
    pub success: bool,
    pub message: String,
}

/// Result of a reload, with a human-readable summary.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: ReloadOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ReloadOutcome> for ReloadResponse {
    fn from(outcome: ReloadOutcome) -> Self {
        let (message, error) = match &outcome {
            ReloadOutcome::Success => (Some("rules reloaded".to_string()), None),
            ReloadOutcome::RawText { output } => (Some(format!("reload finished: {output}")), None),
            ReloadOutcome::Rejected { raw } => (None, Some(format!("reload rejected: {raw}"))),
            ReloadOutcome::CommandFailed { stderr, .. } => (None, Some(stderr.clone())),
        };
        Self {
            success: outcome.is_success(),
            outcome,
            message,
            error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(flatten)]
    pub status: StatusSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

impl ErrorBody {
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_history_limit_defaults_and_clamps() {
        assert_eq!(HistoryQuery::default().limit(), 50);
        assert_eq!(HistoryQuery { limit: Some(0) }.limit(), 1);
        assert_eq!(HistoryQuery { limit: Some(5_000) }.limit(), 1_000);
        assert_eq!(HistoryQuery { limit: Some(7) }.limit(), 7);
    }

    #[test]
    fn test_rejected_reload_reports_error() {
        let response = ReloadResponse::from(ReloadOutcome::Rejected {
            raw: json!({"message": "busy"}),
        });
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["outcome"], "rejected");
        assert!(value["error"].as_str().unwrap().contains("busy"));
        assert!(value.get("message").is_none());
    }

    #[test]
    fn test_raw_text_reload_is_success() {
        let response = ReloadResponse::from(ReloadOutcome::RawText {
            output: "ok".into(),
        });
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["message"], "reload finished: ok");
    }

    #[test]
    fn test_error_body_shape() {
        let value = serde_json::to_value(ErrorBody::new("SSH connection not established")).unwrap();
        assert_eq!(value, json!({"success": false, "error": "SSH connection not established"}));
    }
}
