use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use tracing::warn;

use deltaflow_llm::{CopywritingError, CopywritingRequest, CopywritingResponse};

use crate::state::AppState;

use super::{api_error, not_configured, ApiError};

/// Missing topic → 400, upstream trouble → 500.
pub async fn generate_copywriting(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CopywritingRequest>,
) -> Result<Json<CopywritingResponse>, ApiError> {
    let generator = state
        .copywriting
        .as_ref()
        .ok_or_else(|| not_configured("copywriting"))?;

    match generator.generate(&req).await {
        Ok(resp) => Ok(Json(resp)),
        Err(e @ CopywritingError::MissingTopic) => Err(api_error(StatusCode::BAD_REQUEST, e.to_string())),
        Err(CopywritingError::Llm(e)) => {
            warn!(error = %e, "copywriting upstream failed");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
