//! Byte-for-byte relay of the agent event stream.
//!
//! The browser (or `deltaflow-cli --relay`) reconstructs text itself; this
//! endpoint only hides the API key and fills in request defaults.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

use super::{api_error, not_configured, ApiError, ChatBody, X_REQUEST_ID};

pub async fn fortune_teller(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> Result<Response, ApiError> {
    let provider = state.chat.as_ref().ok_or_else(|| not_configured("agent chat"))?;
    let request = body.into_request(&state.config.coze);
    let request_id = Uuid::new_v4();

    info!(
        request_id = %request_id,
        bot_id = %request.bot_id,
        user_id = %request.user_id,
        "relaying agent stream"
    );

    let stream = provider.open_stream(&request).await.map_err(|e| {
        warn!(request_id = %request_id, error = %e, "upstream refused relay request");
        api_error(StatusCode::BAD_GATEWAY, e.to_string())
    })?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header(X_REQUEST_ID, request_id.to_string())
        .body(Body::from_stream(stream))
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
