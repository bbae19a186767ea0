//! Transport layer for browser clients.
//!
//! Provides:
//! - Wire protocol (JSON request/response bodies)
//! - HTTP routes: SSE log stream, history, rules, status (feature: http)

pub mod protocol;

#[cfg(feature = "http")]
pub mod http;

pub use protocol::{
    ErrorBody, HistoryQuery, HistoryResponse, ReloadResponse, RulesBody, RulesResponse,
    SaveResponse, StatusResponse,
};

#[cfg(feature = "http")]
pub use http::{ApiError, AppState, router};
