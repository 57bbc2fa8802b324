//! Client for a relay that forwards the agent stream verbatim.

use async_trait::async_trait;
use tracing::debug;

use crate::provider::{ByteStream, ChatRequest, LlmError, StreamingChatProvider};

use super::{body_stream, check_status, expect_event_stream};

/// Posts `{query, bot_id, user_id}` to `{base_url}/fortune-teller`.
pub struct RelayProvider {
    client: reqwest::Client,
    base_url: String,
    bearer: Option<String>,
}

impl RelayProvider {
    pub fn new(base_url: String, bearer: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, bearer)
    }

    pub fn with_client(client: reqwest::Client, base_url: String, bearer: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer,
        }
    }

    pub fn relay_url(&self) -> String {
        format!("{}/fortune-teller", self.base_url)
    }
}

#[async_trait]
impl StreamingChatProvider for RelayProvider {
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, LlmError> {
        let url = self.relay_url();
        debug!(url = %url, user_id = %request.user_id, "opening relay stream");

        let mut builder = self.client.post(&url).json(request);
        if let Some(token) = &self.bearer {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let response = check_status(response).await?;
        let response = expect_event_stream(response).await?;
        Ok(body_stream(response))
    }

    fn provider_name(&self) -> &str {
        "relay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_url_joins_path() {
        let p = RelayProvider::new("http://localhost:3001/".into(), None);
        assert_eq!(p.relay_url(), "http://localhost:3001/fortune-teller");
    }
}
