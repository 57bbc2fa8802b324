use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use deltaflow_core::Config;
use deltaflow_llm::{CopywritingGenerator, RequestSlot, RequestTicket, StreamingChatProvider};
use deltaflow_stream::ClassifierConfig;

pub struct AppState {
    pub config: Config,
    /// `None` when no agent API key is configured.
    pub chat: Option<Arc<dyn StreamingChatProvider>>,
    pub copywriting: Option<CopywritingGenerator>,
    pub classifier: ClassifierConfig,
    /// One slot per user id: a new `/chat/stream` request supersedes the
    /// previous one from the same user.
    slots: Mutex<HashMap<String, RequestSlot>>,
}

impl AppState {
    pub fn new(
        config: Config,
        chat: Option<Arc<dyn StreamingChatProvider>>,
        copywriting: Option<CopywritingGenerator>,
    ) -> Self {
        Self {
            classifier: ClassifierConfig::from(&config.stream),
            config,
            chat,
            copywriting,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let chat: Option<Arc<dyn StreamingChatProvider>> = if config.coze.is_configured() {
            Some(Arc::from(deltaflow_llm::providers::create_chat_provider(
                &config.coze,
                &config.http,
            )?))
        } else {
            warn!("COZE_API_KEY not set, /fortune-teller and /chat/stream will answer 503");
            None
        };

        let copywriting = if config.copywriting.is_configured() {
            Some(CopywritingGenerator::from_config(&config.copywriting, &config.http)?)
        } else {
            warn!("COPYWRITING_API_KEY not set, /generate-copywriting will answer 503");
            None
        };

        Ok(Self::new(config, chat, copywriting))
    }

    pub async fn begin_request(&self, user_id: &str) -> RequestTicket {
        let mut slots = self.slots.lock().await;
        slots.entry(user_id.to_string()).or_default().begin()
    }

    /// Forget the user's slot unless a newer request already took it over.
    pub async fn end_request(&self, user_id: &str, ticket: &RequestTicket) {
        let mut slots = self.slots.lock().await;
        if ticket.is_current() {
            slots.remove(user_id);
        }
    }

    pub async fn active_requests(&self) -> usize {
        self.slots.lock().await.len()
    }
}
