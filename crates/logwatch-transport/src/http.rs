//! Axum routes over a running monitor.

use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, KeepAliveStream, Sse},
    },
    routing::{get, post},
};
use futures::stream::BoxStream;
use logwatch_monitor::{MonitorContext, RuleError, RuleGateway};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::protocol::{
    ErrorBody, HistoryQuery, HistoryResponse, ReloadResponse, RulesBody, RulesResponse,
    SaveResponse, StatusResponse,
};

/// Shared handler state.
#[derive(Clone, Debug)]
pub struct AppState {
    pub monitor: MonitorContext,
    /// `None` when no rule file is configured.
    pub rules: Option<RuleGateway>,
}

impl AppState {
    #[must_use]
    pub const fn new(monitor: MonitorContext, rules: Option<RuleGateway>) -> Self {
        Self { monitor, rules }
    }

    fn rules(&self) -> Result<&RuleGateway, ApiError> {
        self.rules.as_ref().ok_or(ApiError::NotConfigured("rules"))
    }
}

/// Handler error, rendered as `{success: false, error}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Rules(#[from] RuleError),
    #[error("Failed to read archive: {0}")]
    Archive(#[from] std::io::Error),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("{0} not configured")]
    NotConfigured(&'static str),
    #[error("Live stream has ended")]
    StreamClosed,
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::Rules(RuleError::NotConnected) | Self::StreamClosed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Rules(RuleError::Session(_)) => StatusCode::BAD_GATEWAY,
            Self::NotConfigured(_) => StatusCode::NOT_FOUND,
            Self::Archive(_) | Self::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(%status, "request failed: {self}");
        }
        (status, Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

/// Build the router.
///
/// Routes:
/// - `GET  /logs/stream`   live SSE stream (`status` events are named)
/// - `GET  /logs/history`  archived lines, `?limit=N`
/// - `GET  /rules`, `POST /rules`, `POST /rules/reload`
/// - `GET  /rules/load`, `POST /rules/save` (aliases)
/// - `GET  /status`
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/logs/stream", get(stream_logs))
        .route("/logs/history", get(log_history))
        .route("/rules", get(load_rules).post(save_rules))
        .route("/rules/load", get(load_rules))
        .route("/rules/save", post(save_rules))
        .route("/rules/reload", post(reload_rules))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn stream_logs(
    State(state): State<AppState>,
) -> Result<Sse<KeepAliveStream<BoxStream<'static, Result<Event, Infallible>>>>, ApiError> {
    let subscriber = state
        .monitor
        .hub()
        .subscribe()
        .map_err(|_| ApiError::StreamClosed)?;
    tracing::info!(subscriber = %subscriber.id(), "stream client connected");
    Ok(Sse::new(subscriber.sse_stream()).keep_alive(KeepAlive::default()))
}

async fn log_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let archive = state
        .monitor
        .archive()
        .cloned()
        .ok_or(ApiError::NotConfigured("history archive"))?;
    let limit = query.limit();
    let logs = tokio::task::spawn_blocking(move || archive.history(limit)).await??;
    Ok(Json(HistoryResponse {
        success: true,
        logs,
    }))
}

async fn load_rules(State(state): State<AppState>) -> Result<Json<RulesResponse>, ApiError> {
    let content = state.rules()?.load().await?;
    Ok(Json(RulesResponse {
        success: true,
        content,
    }))
}

async fn save_rules(
    State(state): State<AppState>,
    Json(body): Json<RulesBody>,
) -> Result<Json<SaveResponse>, ApiError> {
    state.rules()?.save(&body.content).await?;
    Ok(Json(SaveResponse {
        success: true,
        message: "rules saved".to_string(),
    }))
}

async fn reload_rules(State(state): State<AppState>) -> Result<Json<ReloadResponse>, ApiError> {
    let outcome = state.rules()?.reload().await?;
    Ok(Json(ReloadResponse::from(outcome)))
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        success: true,
        status: state.monitor.snapshot(),
    })
}
