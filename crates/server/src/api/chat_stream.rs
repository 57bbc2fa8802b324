//! Server-side reconstruction: the client receives text deltas, not raw frames.
//!
//! Events emitted:
//! - `delta` -- `{"text": ...}` for every appended piece, in order
//! - `done`  -- the upstream finished
//! - `error` -- terminal failure; text already sent stays valid

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderName;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::{Stream, StreamExt};
use serde_json::json;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use deltaflow_llm::{run_chat, ChannelSink, SinkEvent, FALLBACK_MESSAGE};
use deltaflow_stream::{DeltaSink, StreamOutcome};

use crate::state::AppState;

use super::{not_configured, ApiError, ChatBody, X_REQUEST_ID};

pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> Result<
    (
        [(HeaderName, String); 1],
        Sse<impl Stream<Item = Result<Event, Infallible>>>,
    ),
    ApiError,
> {
    let provider = state.chat.clone().ok_or_else(|| not_configured("agent chat"))?;
    let request = body.into_request(&state.config.coze);
    let request_id = Uuid::new_v4();
    let ticket = state.begin_request(&request.user_id).await;

    let (mut sink, rx) = ChannelSink::channel();
    let watcher = sink.clone();
    let span = info_span!("chat_stream", request_id = %request_id);

    tokio::spawn(
        async move {
            info!(bot_id = %request.bot_id, user_id = %request.user_id, "chat stream started");
            let classifier = state.classifier.clone();
            let outcome = tokio::select! {
                outcome = run_chat(provider.as_ref(), &request, &classifier, &mut sink, &ticket) => Some(outcome),
                _ = watcher.closed() => None,
            };
            match outcome {
                Some(StreamOutcome::Superseded) => {
                    info!("superseded by a newer request from the same user");
                    sink.on_finish(&StreamOutcome::Superseded);
                }
                Some(outcome) => debug!(outcome = ?outcome, "chat stream ended"),
                None => info!("client disconnected, dropping upstream connection"),
            }
            state.end_request(&request.user_id, &ticket).await;
        }
        .instrument(span),
    );

    let events = UnboundedReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(to_sse(event)));
    Ok((
        [(X_REQUEST_ID, request_id.to_string())],
        Sse::new(events).keep_alive(KeepAlive::default()),
    ))
}

pub(crate) fn to_sse(event: SinkEvent) -> Event {
    match event {
        SinkEvent::Delta(text) => Event::default()
            .event("delta")
            .data(json!({ "text": text }).to_string()),
        SinkEvent::Finished(StreamOutcome::Completed) => Event::default()
            .event("done")
            .data(json!({ "status": "completed" }).to_string()),
        SinkEvent::Finished(StreamOutcome::Failed { message }) => Event::default()
            .event("error")
            .data(json!({ "message": FALLBACK_MESSAGE, "detail": message }).to_string()),
        SinkEvent::Finished(StreamOutcome::Superseded) => Event::default()
            .event("error")
            .data(json!({ "message": "superseded by a newer request" }).to_string()),
    }
}
