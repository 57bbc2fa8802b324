use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A chat message for the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Trait for request/response completion backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request and return the assistant's response text.
    async fn complete(
        &self,
        messages: Vec<Message>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, LlmError>;
}

#[async_trait]
impl<T: LlmProvider + ?Sized> LlmProvider for Arc<T> {
    async fn complete(
        &self,
        messages: Vec<Message>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        (**self).complete(messages, temperature, max_tokens).await
    }
}

/// Raw response body of a streaming chat call, chunked as it came off the wire.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, LlmError>> + Send>>;

/// Query used when the caller sends an empty one.
pub const DEFAULT_QUERY: &str = "你好";

/// One user-initiated chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    pub bot_id: String,
    pub user_id: String,
}

impl ChatRequest {
    /// New request with a fresh random user id.
    pub fn new(query: impl Into<String>, bot_id: impl Into<String>) -> Self {
        let query = query.into();
        Self {
            query: if query.trim().is_empty() { DEFAULT_QUERY.to_string() } else { query },
            bot_id: bot_id.into(),
            user_id: random_user_id(),
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }
}

/// `user_` followed by seven random lowercase alphanumerics.
pub fn random_user_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    format!("user_{}", suffix)
}

/// Backend that answers a chat request with an event-stream body.
#[async_trait]
pub trait StreamingChatProvider: Send + Sync {
    /// Send the request and hand back the response body once headers say 2xx.
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, LlmError>;

    /// Provider name for logging/debugging (e.g., "coze", "relay")
    fn provider_name(&self) -> &str;
}

#[async_trait]
impl<T: StreamingChatProvider + ?Sized> StreamingChatProvider for Arc<T> {
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, LlmError> {
        (**self).open_stream(request).await
    }

    fn provider_name(&self) -> &str {
        (**self).provider_name()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("Authentication failed")]
    AuthError,
    #[error("Stream error: {0}")]
    StreamError(String),
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl From<deltaflow_core::CoreError> for LlmError {
    fn from(err: deltaflow_core::CoreError) -> Self {
        LlmError::NotConfigured(err.to_string())
    }
}

/// Scripted providers for exercising the stream runner without a network.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use futures::{stream, StreamExt};
    use std::sync::Mutex;

    /// Replays a fixed list of body chunks (or errors) for every request.
    pub struct MockChatProvider {
        script: Vec<Result<Vec<u8>, String>>,
        open_error: Option<u16>,
        hang_at_end: bool,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl MockChatProvider {
        pub fn new(chunks: Vec<&[u8]>) -> Self {
            Self {
                script: chunks.into_iter().map(|c| Ok(c.to_vec())).collect(),
                open_error: None,
                hang_at_end: false,
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Append a transport error after the scripted chunks.
        pub fn then_fail(mut self, message: &str) -> Self {
            self.script.push(Err(message.to_string()));
            self
        }

        /// Keep the connection open and silent after the scripted chunks.
        pub fn then_hang(mut self) -> Self {
            self.hang_at_end = true;
            self
        }

        /// Fail before any body arrives, as a non-2xx response would.
        pub fn failing_with_status(status: u16) -> Self {
            Self {
                script: Vec::new(),
                open_error: Some(status),
                hang_at_end: false,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StreamingChatProvider for MockChatProvider {
        async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(status) = self.open_error {
                return Err(LlmError::ApiError {
                    status,
                    message: "mock upstream failure".into(),
                });
            }
            let items: Vec<Result<Bytes, LlmError>> = self
                .script
                .iter()
                .map(|step| match step {
                    Ok(chunk) => Ok(Bytes::from(chunk.clone())),
                    Err(message) => Err(LlmError::StreamError(message.clone())),
                })
                .collect();
            if self.hang_at_end {
                return Ok(Box::pin(stream::iter(items).chain(stream::pending())));
            }
            Ok(Box::pin(stream::iter(items)))
        }

        fn provider_name(&self) -> &str {
            "mock"
        }
    }

    /// A completion provider that returns pre-configured responses.
    pub struct MockLlmProvider {
        responses: Mutex<Vec<Result<String, LlmError>>>,
        calls: Mutex<Vec<Vec<Message>>>,
    }

    impl MockLlmProvider {
        pub fn new() -> Self {
            Self {
                responses: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Queue a response that will be returned on the next call.
        pub fn queue_text(&self, text: &str) {
            self.responses.lock().unwrap().push(Ok(text.to_string()));
        }

        pub fn queue_error(&self, err: LlmError) {
            self.responses.lock().unwrap().push(Err(err));
        }

        pub fn calls(&self) -> Vec<Vec<Message>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Default for MockLlmProvider {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn complete(
            &self,
            messages: Vec<Message>,
            _temperature: f32,
            _max_tokens: u32,
        ) -> Result<String, LlmError> {
            self.calls.lock().unwrap().push(messages);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(String::new());
            }
            responses.remove(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_user_id_shape() {
        let id = random_user_id();
        assert!(id.starts_with("user_"));
        let suffix = &id["user_".len()..];
        assert_eq!(suffix.len(), 7);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn empty_query_falls_back_to_greeting() {
        let req = ChatRequest::new("   ", "bot");
        assert_eq!(req.query, DEFAULT_QUERY);
        assert_eq!(req.bot_id, "bot");
    }

    #[test]
    fn each_request_gets_its_own_user_id() {
        let a = ChatRequest::new("q", "bot");
        let b = ChatRequest::new("q", "bot");
        // 36^7 possibilities; a collision here means the generator is broken.
        assert_ne!(a.user_id, b.user_id);
    }

    #[test]
    fn request_json_shape() {
        let req = ChatRequest::new("hi", "b1").with_user_id("user_abc");
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v, serde_json::json!({"query":"hi","bot_id":"b1","user_id":"user_abc"}));
    }
}
