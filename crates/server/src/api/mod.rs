//! HTTP endpoints.
//!
//! Shared request/response types live here; each sub-module owns one route.

mod chat_stream;
mod copywriting;
mod health;
mod relay;


use axum::http::{HeaderName, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use deltaflow_core::config::CozeConfig;
use deltaflow_llm::ChatRequest;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

// ── Shared types ─────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub(crate) fn not_configured(what: &str) -> ApiError {
    api_error(
        StatusCode::SERVICE_UNAVAILABLE,
        format!("{} is not configured on this server", what),
    )
}

/// Body of both chat endpoints. Every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl ChatBody {
    /// Fill missing fields from config: configured bot, random user, greeting query.
    pub fn into_request(self, coze: &CozeConfig) -> ChatRequest {
        let bot_id = self
            .bot_id
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| coze.bot_id.clone());
        let request = ChatRequest::new(self.query.unwrap_or_default(), bot_id);
        match self.user_id.filter(|u| !u.trim().is_empty()) {
            Some(user_id) => request.with_user_id(user_id),
            None => request,
        }
    }
}

// ── Re-exports ───────────────────────────────────────────────────

pub use chat_stream::chat_stream;
pub use copywriting::generate_copywriting;
pub use health::health;
pub use relay::fortune_teller;
