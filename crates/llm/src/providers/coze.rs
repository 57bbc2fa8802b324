//! Agent chat API (`/v3/chat`) with `stream: true`.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::provider::{ByteStream, ChatRequest, LlmError, StreamingChatProvider};

use super::{body_stream, check_status, expect_event_stream};

pub struct CozeProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    bot_id: &'a str,
    user_id: &'a str,
    stream: bool,
    additional_messages: Vec<AdditionalMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AdditionalMessage<'a> {
    role: &'static str,
    content: &'a str,
    content_type: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
}

impl<'a> ChatBody<'a> {
    fn from_request(request: &'a ChatRequest) -> Self {
        Self {
            bot_id: &request.bot_id,
            user_id: &request.user_id,
            stream: true,
            additional_messages: vec![AdditionalMessage {
                role: "user",
                content: &request.query,
                content_type: "text",
                kind: "question",
            }],
        }
    }
}

impl CozeProvider {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_key, base_url)
    }

    pub fn with_client(client: reqwest::Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn chat_url(&self) -> String {
        format!("{}/v3/chat", self.base_url)
    }
}

#[async_trait]
impl StreamingChatProvider for CozeProvider {
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, LlmError> {
        let url = self.chat_url();
        debug!(url = %url, bot_id = %request.bot_id, user_id = %request.user_id, "starting agent chat stream");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Accept", "text/event-stream")
            .json(&ChatBody::from_request(request))
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let response = check_status(response).await?;
        let response = expect_event_stream(response).await?;
        Ok(body_stream(response))
    }

    fn provider_name(&self) -> &str {
        "coze"
    }
}
