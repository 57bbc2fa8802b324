pub mod coze;
pub mod openai;
pub mod relay;

use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;

use deltaflow_core::config::{CopywritingConfig, CozeConfig, HttpConfig};

use crate::provider::{ByteStream, LlmError, LlmProvider, StreamingChatProvider};

/// Shared HTTP client with the configured connect timeout.
///
/// No overall request timeout: a chat stream stays open for as long as the
/// upstream keeps writing.
pub fn build_client(http: &HttpConfig) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
        .build()
        .map_err(|e| LlmError::NetworkError(e.to_string()))
}

/// Build the agent chat provider from config.
pub fn create_chat_provider(
    coze: &CozeConfig,
    http: &HttpConfig,
) -> Result<Box<dyn StreamingChatProvider>, LlmError> {
    let api_key = coze.require_api_key()?;
    Ok(Box::new(coze::CozeProvider::with_client(
        build_client(http)?,
        api_key.to_string(),
        coze.base_url.clone(),
    )))
}

/// Build the completion provider used for copywriting.
pub fn create_copywriting_provider(
    cfg: &CopywritingConfig,
    http: &HttpConfig,
) -> Result<Box<dyn LlmProvider>, LlmError> {
    let api_key = cfg
        .api_key
        .as_ref()
        .ok_or_else(|| LlmError::NotConfigured("COPYWRITING_API_KEY not set".into()))?;
    Ok(Box::new(openai::OpenAiCompatProvider::with_client(
        build_client(http)?,
        api_key.clone(),
        cfg.model.clone(),
        cfg.base_url.clone(),
    )))
}

/// Map a non-2xx response to an error; pass 2xx through untouched.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status().as_u16();
    if response.status().is_success() {
        return Ok(response);
    }

    let body_text = response.text().await.unwrap_or_default();
    if status == 401 {
        return Err(LlmError::AuthError);
    }
    if status == 429 {
        let retry_after = serde_json::from_str::<Value>(&body_text)
            .ok()
            .and_then(|v| v["error"]["retry_after_secs"].as_u64())
            .unwrap_or(30);
        return Err(LlmError::RateLimited {
            retry_after_secs: retry_after,
        });
    }
    Err(LlmError::ApiError {
        status,
        message: body_text,
    })
}

/// Accept a 2xx only if it really is an event stream.
///
/// The agent API reports most request errors as status 200 with a JSON body
/// such as `{"code":4100,"msg":"..."}`. Fed to the stream pipeline that body
/// would end as an empty `Completed` answer, so it is turned into an error here.
pub(crate) async fn expect_event_stream(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let is_event_stream = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("text/event-stream"));
    if is_event_stream {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let body_text = response
        .text()
        .await
        .map_err(|e| LlmError::NetworkError(e.to_string()))?;
    Err(non_stream_error(status, &body_text))
}

fn non_stream_error(status: u16, body_text: &str) -> LlmError {
    let message = match serde_json::from_str::<Value>(body_text) {
        Ok(v) => {
            let msg = v["msg"]
                .as_str()
                .or_else(|| v["error"]["message"].as_str())
                .unwrap_or("expected an event stream");
            match v["code"].as_i64() {
                Some(code) if code != 0 => format!("code {}: {}", code, msg),
                _ => msg.to_string(),
            }
        }
        Err(_) if body_text.trim().is_empty() => "empty response instead of an event stream".to_string(),
        Err(_) => body_text.chars().take(200).collect(),
    };
    LlmError::ApiError { status, message }
}

/// Response body as raw chunks; decoding is left to the stream pipeline.
pub(crate) fn body_stream(response: reqwest::Response) -> ByteStream {
    Box::pin(
        response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| LlmError::StreamError(e.to_string()))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_error_code_becomes_api_error() {
        let err = non_stream_error(200, r#"{"code":4100,"msg":"authentication is invalid"}"#);
        match err {
            LlmError::ApiError { status, message } => {
                assert_eq!(status, 200);
                assert_eq!(message, "code 4100: authentication is invalid");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn plain_text_body_is_kept_as_message() {
        let err = non_stream_error(200, "gateway says no");
        assert!(matches!(err, LlmError::ApiError { ref message, .. } if message == "gateway says no"));
    }

    #[test]
    fn empty_body_is_reported() {
        let err = non_stream_error(204, "");
        assert!(matches!(err, LlmError::ApiError { status: 204, .. }));
    }
}
