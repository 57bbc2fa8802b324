//! Non-streaming `/v1/chat/completions` client used for copywriting.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::provider::{LlmError, LlmProvider, Message};

use super::check_status;

/// Any backend speaking the OpenAI chat completions protocol.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    /// Some gateways report failures in-band with a 200 status.
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl CompletionResponse {
    fn into_content(self, status: u16) -> Result<String, LlmError> {
        if let Some(err) = self.error {
            return Err(LlmError::ApiError {
                status,
                message: err.message,
            });
        }
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message.content".into()))
    }
}

impl OpenAiCompatProvider {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_key, model, base_url)
    }

    pub fn with_client(client: reqwest::Client, api_key: String, model: String, base_url: String) -> Self {
        Self {
            client,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn complete(
        &self,
        messages: Vec<Message>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let url = self.completions_url();
        debug!(url = %url, model = %self.model, messages = messages.len(), "completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&CompletionBody {
                model: &self.model,
                messages: &messages,
                temperature,
                max_tokens,
            })
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let response = check_status(response).await?;
        let status = response.status().as_u16();
        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        parsed.into_content(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> CompletionResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn body_uses_lowercase_roles() {
        let messages = vec![Message::system("sys"), Message::user("主题：咖啡")];
        let body = serde_json::to_value(CompletionBody {
            model: "deepseek-ai/DeepSeek-V2.5",
            messages: &messages,
            temperature: 0.7,
            max_tokens: 512,
        })
        .unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["max_tokens"], 512);
    }

    #[test]
    fn first_choice_content_is_returned() {
        let resp = parse(r#"{"choices":[{"message":{"role":"assistant","content":"☕"}}]}"#);
        assert_eq!(resp.into_content(200).unwrap(), "☕");
    }

    #[test]
    fn in_band_error_is_an_api_error() {
        let resp = parse(r#"{"error":{"message":"model not found"}}"#);
        match resp.into_content(200) {
            Err(LlmError::ApiError { status, message }) => {
                assert_eq!(status, 200);
                assert_eq!(message, "model not found");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn empty_choices_is_invalid() {
        let resp = parse(r#"{"choices":[]}"#);
        assert!(matches!(resp.into_content(200), Err(LlmError::InvalidResponse(_))));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let p = OpenAiCompatProvider::new("k".into(), "m".into(), "https://api.siliconflow.cn/".into());
        assert_eq!(p.completions_url(), "https://api.siliconflow.cn/v1/chat/completions");
    }
}
