use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use deltaflow_core::config::{CopywritingConfig, HttpConfig};

use crate::prompts::{copywriting_user_prompt, COPYWRITING_SYSTEM_PROMPT};
use crate::provider::{LlmError, LlmProvider, Message};

/// Input of one copywriting call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CopywritingRequest {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopywritingResponse {
    pub content: String,
}

/// Generates a social-media note for a topic through a completion backend.
pub struct CopywritingGenerator {
    provider: Box<dyn LlmProvider>,
    temperature: f32,
    max_tokens: u32,
}

impl CopywritingGenerator {
    pub fn new(provider: Box<dyn LlmProvider>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            provider,
            temperature,
            max_tokens,
        }
    }

    /// Build from config, creating the completion provider.
    pub fn from_config(cfg: &CopywritingConfig, http: &HttpConfig) -> Result<Self, LlmError> {
        let provider = crate::providers::create_copywriting_provider(cfg, http)?;
        Ok(Self::new(provider, cfg.temperature, cfg.max_tokens))
    }

    pub async fn generate(&self, request: &CopywritingRequest) -> Result<CopywritingResponse, CopywritingError> {
        let topic = request
            .topic
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(CopywritingError::MissingTopic)?;

        info!(topic = %topic, "generating copywriting");

        let messages = vec![
            Message::system(COPYWRITING_SYSTEM_PROMPT),
            Message::user(copywriting_user_prompt(topic, request.keywords.as_deref())),
        ];

        let content = self
            .provider
            .complete(messages, self.temperature, self.max_tokens)
            .await?;

        debug!(chars = content.chars().count(), "copywriting response received");
        Ok(CopywritingResponse { content })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CopywritingError {
    #[error("Missing topic")]
    MissingTopic,
    #[error(transparent)]
    Llm(#[from] LlmError),
}
