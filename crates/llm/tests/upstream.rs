//! Providers and the runner against a local mock upstream.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use deltaflow_llm::{
    run_chat, ChatRequest, CopywritingGenerator, CopywritingRequest, CozeProvider, LlmError,
    LlmProvider, Message, OpenAiCompatProvider, RelayProvider, RequestSlot, StreamingChatProvider,
};
use deltaflow_stream::{ClassifierConfig, ResultBuffer, StreamOutcome};

#[derive(Clone, Default)]
struct Recorded {
    bodies: Arc<Mutex<Vec<Value>>>,
}

const TRANSCRIPT: &[&str] = &[
    "event:conversation.chat.created\ndata:{\"id\":\"1\",\"status\":\"created\"}\n\n",
    "event:conversation.message.delta\ndata:{\"type\":\"answer\",\"content\":\"甲木",
    "生于寅月\"}\n\nevent:conversation.message.delta\ndata:{\"type\":\"answer\",\"content\":\"，",
    "得令而旺。\"}\n\n",
    "event:conversation.message.completed\ndata:{\"type\":\"answer\",\"content\":\"甲木生于寅月，得令而旺。\"}\n\n",
    "event:done\ndata:\"[DONE]\"\n\n",
];

fn sse_response(chunks: Vec<&'static str>) -> Response {
    let body = stream::iter(
        chunks
            .into_iter()
            .map(|chunk| Ok::<_, std::io::Error>(Bytes::from(chunk))),
    );
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .body(Body::from_stream(body))
        .unwrap()
}

async fn agent_chat(State(rec): State<Recorded>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    rec.bodies.lock().unwrap().push(body);
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some("Bearer good-key") => sse_response(TRANSCRIPT.to_vec()),
        Some("Bearer expired-key") => {
            Json(json!({"code": 4100, "msg": "authentication is invalid"})).into_response()
        }
        Some("Bearer limited-key") => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": {"retry_after_secs": 7}})),
        )
            .into_response(),
        _ => (StatusCode::UNAUTHORIZED, "bad token").into_response(),
    }
}

async fn relay(State(rec): State<Recorded>, Json(body): Json<Value>) -> Response {
    let failing = body["query"] == "boom";
    rec.bodies.lock().unwrap().push(body);
    if failing {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response();
    }
    sse_response(vec![
        "data: {\"content\":\"relayed \"}\n\n",
        "data: {\"content\":\"text\"}\n\n",
        "data: [DONE]\n\n",
    ])
}

async fn completions(State(rec): State<Recorded>, Json(body): Json<Value>) -> Response {
    rec.bodies.lock().unwrap().push(body);
    Json(json!({"choices": [{"message": {"role": "assistant", "content": "🍂 秋天的第一杯咖啡"}}]}))
        .into_response()
}

async fn create_mock_server(rec: Recorded) -> String {
    let app = Router::new()
        .route("/v3/chat", post(agent_chat))
        .route("/fortune-teller", post(relay))
        .route("/v1/chat/completions", post(completions))
        .with_state(rec);

    let addr = SocketAddr::from(([127, 0, 0, 1], 0));
    let listener = TcpListener::bind(addr).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn agent_stream_is_reconstructed() {
    let rec = Recorded::default();
    let base = create_mock_server(rec.clone()).await;
    let provider = CozeProvider::new("good-key".into(), base);
    let request = ChatRequest::new("甲子年正月初一", "7603961930159505435");
    let mut buf = ResultBuffer::new();

    let outcome = run_chat(
        &provider,
        &request,
        &ClassifierConfig::default(),
        &mut buf,
        &RequestSlot::new().begin(),
    )
    .await;

    assert_eq!(outcome, StreamOutcome::Completed);
    assert_eq!(buf.as_str(), "甲木生于寅月，得令而旺。");

    let bodies = rec.bodies.lock().unwrap();
    assert_eq!(bodies[0]["bot_id"], "7603961930159505435");
    assert_eq!(bodies[0]["stream"], true);
    assert_eq!(bodies[0]["user_id"], request.user_id.as_str());
    assert_eq!(bodies[0]["additional_messages"][0]["content"], "甲子年正月初一");
}

#[tokio::test]
async fn bad_token_maps_to_auth_error() {
    let base = create_mock_server(Recorded::default()).await;
    let provider = CozeProvider::new("nope".into(), base);
    let err = provider
        .open_stream(&ChatRequest::new("hi", "bot"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, LlmError::AuthError));
}

#[tokio::test]
async fn error_body_with_ok_status_fails_the_stream() {
    let base = create_mock_server(Recorded::default()).await;
    let provider = CozeProvider::new("expired-key".into(), base);
    let mut buf = ResultBuffer::new();

    let outcome = run_chat(
        &provider,
        &ChatRequest::new("hi", "bot"),
        &ClassifierConfig::default(),
        &mut buf,
        &RequestSlot::new().begin(),
    )
    .await;

    match outcome {
        StreamOutcome::Failed { message } => {
            assert!(message.contains("4100"), "{}", message);
            assert!(message.contains("authentication is invalid"), "{}", message);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(buf.is_empty());
}

#[tokio::test]
async fn rate_limit_carries_retry_after() {
    let base = create_mock_server(Recorded::default()).await;
    let provider = CozeProvider::new("limited-key".into(), base);
    let err = provider
        .open_stream(&ChatRequest::new("hi", "bot"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, LlmError::RateLimited { retry_after_secs: 7 }));
}

#[tokio::test]
async fn relay_stream_and_failure() {
    let rec = Recorded::default();
    let base = create_mock_server(rec.clone()).await;
    let provider = RelayProvider::new(base, Some("anon".into()));
    let slot = RequestSlot::new();

    let mut buf = ResultBuffer::new();
    let ok = run_chat(
        &provider,
        &ChatRequest::new("q", "bot"),
        &ClassifierConfig::default(),
        &mut buf,
        &slot.begin(),
    )
    .await;
    assert_eq!(ok, StreamOutcome::Completed);
    assert_eq!(buf.as_str(), "relayed text");

    let failed = run_chat(
        &provider,
        &ChatRequest::new("boom", "bot"),
        &ClassifierConfig::default(),
        &mut buf,
        &slot.begin(),
    )
    .await;
    assert!(matches!(failed, StreamOutcome::Failed { ref message } if message.contains("500")));
    assert!(buf.is_empty());
    assert_eq!(rec.bodies.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn unreachable_upstream_is_a_network_error() {
    // Bind then drop so the port is almost certainly closed.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let provider = CozeProvider::new("good-key".into(), format!("http://{}", addr));
    let err = provider
        .open_stream(&ChatRequest::new("hi", "bot"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, LlmError::NetworkError(_)));
}

#[tokio::test]
async fn completion_and_copywriting() {
    let rec = Recorded::default();
    let base = create_mock_server(rec.clone()).await;

    let provider = OpenAiCompatProvider::new("k".into(), "deepseek-ai/DeepSeek-V2.5".into(), base.clone());
    let text = provider
        .complete(vec![Message::user("hi")], 0.7, 64)
        .await
        .unwrap();
    assert_eq!(text, "🍂 秋天的第一杯咖啡");

    let writer = CopywritingGenerator::new(
        Box::new(OpenAiCompatProvider::new("k".into(), "m".into(), base)),
        0.7,
        256,
    );
    let resp = writer
        .generate(&CopywritingRequest {
            topic: Some("咖啡".into()),
            keywords: None,
        })
        .await
        .unwrap();
    assert_eq!(resp.content, "🍂 秋天的第一杯咖啡");

    let bodies = rec.bodies.lock().unwrap();
    assert_eq!(bodies[1]["model"], "m");
    assert_eq!(bodies[1]["messages"][1]["content"], "主题：咖啡\n关键词：无");
}
