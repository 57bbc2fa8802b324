pub mod copywriting;
pub mod prompts;
pub mod provider;
pub mod providers;
pub mod runner;

pub use copywriting::{CopywritingError, CopywritingGenerator, CopywritingRequest, CopywritingResponse};
pub use provider::{ByteStream, ChatRequest, LlmError, LlmProvider, Message, Role, StreamingChatProvider};
pub use providers::coze::CozeProvider;
pub use providers::openai::OpenAiCompatProvider;
pub use providers::relay::RelayProvider;
pub use runner::{pump, run_chat, ChannelSink, RequestSlot, RequestTicket, SinkEvent, FALLBACK_MESSAGE};
