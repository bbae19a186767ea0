//! Remote rule file access and rule reload.

use std::{sync::Arc, time::Duration};

use logwatch_core::{CommandOutput, RemoteSession, SessionError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rule gateway error.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Remote session is not connected")]
    NotConnected,
}

/// Where the rule file lives and how to make the engine pick it up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesConfig {
    pub path: String,
    pub reload_command: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    30
}

impl RulesConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// How a reload went.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReloadOutcome {
    /// The engine acknowledged the reload.
    Success,
    /// The engine answered in JSON but did not acknowledge.
    Rejected { raw: Value },
    /// The command succeeded with non-JSON output. Informational.
    RawText { output: String },
    /// The command itself failed.
    CommandFailed { exit_status: i32, stderr: String },
}

impl ReloadOutcome {
    /// Whether the operator should treat this as done.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::RawText { .. })
    }
}

/// Sort a reload command's result.
///
/// Unparseable output is not an error: the command ran, it just did not
/// speak JSON.
#[must_use]
pub fn classify_reload(output: &CommandOutput) -> ReloadOutcome {
    if !output.success() {
        return ReloadOutcome::CommandFailed {
            exit_status: output.exit_status,
            stderr: output.stderr.trim().to_string(),
        };
    }

    let text = output.stdout.trim();
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => {
            let acknowledged = map.get("message").and_then(Value::as_str) == Some("done")
                && map.get("return").and_then(Value::as_str) == Some("OK");
            if acknowledged {
                ReloadOutcome::Success
            } else {
                ReloadOutcome::Rejected {
                    raw: Value::Object(map),
                }
            }
        }
        Ok(_) | Err(_) => ReloadOutcome::RawText {
            output: text.to_string(),
        },
    }
}

/// Read, replace and reload the remote rule file over the shared session.
#[derive(Clone)]
pub struct RuleGateway {
    session: Arc<dyn RemoteSession>,
    config: RulesConfig,
}

impl RuleGateway {
    #[must_use]
    pub fn new(session: Arc<dyn RemoteSession>, config: RulesConfig) -> Self {
        Self { session, config }
    }

    #[must_use]
    pub const fn config(&self) -> &RulesConfig {
        &self.config
    }

    fn ensure_connected(&self) -> Result<(), RuleError> {
        if self.session.is_connected() {
            Ok(())
        } else {
            Err(RuleError::NotConnected)
        }
    }

    /// Current rule text.
    ///
    /// # Errors
    /// Returns error if the session is down or the file cannot be read.
    pub async fn load(&self) -> Result<String, RuleError> {
        self.ensure_connected()?;
        Ok(self.session.read_file(&self.config.path).await?)
    }

    /// Replace the rule text. Does not reload.
    ///
    /// # Errors
    /// Returns error if the session is down or the write fails.
    pub async fn save(&self, text: &str) -> Result<(), RuleError> {
        self.ensure_connected()?;
        self.session.write_file(&self.config.path, text).await?;
        tracing::info!(path = %self.config.path, bytes = text.len(), "rules saved");
        Ok(())
    }

    /// Run the reload command and classify its answer.
    ///
    /// # Errors
    /// Returns error only if the command could not be run at all.
    pub async fn reload(&self) -> Result<ReloadOutcome, RuleError> {
        self.ensure_connected()?;
        let output = self
            .session
            .execute(&self.config.reload_command, self.config.timeout())
            .await?;
        let outcome = classify_reload(&output);
        tracing::info!(?outcome, "rule reload finished");
        Ok(outcome)
    }
}

impl std::fmt::Debug for RuleGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleGateway")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
