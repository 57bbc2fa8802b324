//! Payload classification: decides what, if anything, a frame contributes to
//! the visible text.
//!
//! Agent APIs interleave narrative text with structured control messages,
//! sometimes inside the same field. Two filters keep the latter off screen:
//! only frames matched by an [`ExtractionRule`] yield text, and extracted text
//! that is itself a complete JSON object is discarded.

use serde_json::Value;
use tracing::{debug, trace};

use deltaflow_core::config::StreamConfig;

use crate::frame::Frame;

/// Classifier settings for one upstream protocol flavour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierConfig {
    /// Event type carrying visible delta text.
    pub delta_event: String,
    /// Literal (non-JSON) `data:` value marking end of stream.
    pub done_sentinel: String,
    /// Event type marking end of stream, if the upstream sends one.
    pub done_event: Option<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}

impl From<&StreamConfig> for ClassifierConfig {
    fn from(cfg: &StreamConfig) -> Self {
        Self {
            delta_event: cfg.delta_event.clone(),
            done_sentinel: cfg.done_sentinel.clone(),
            done_event: cfg.done_event.clone(),
        }
    }
}

/// What a single frame means to the reader of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedEvent {
    /// Text to append to the result.
    Delta(String),
    /// Protocol signal with no visible text.
    Control(ControlSignal),
    /// Frame dropped, with the reason recorded.
    Discarded(DiscardReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    /// End-of-stream sentinel; nothing after it is read.
    Done,
    ChatCompleted,
    ChatFailed { message: String },
    MessageCompleted,
    Error { message: String },
    /// Any other typed event, by name.
    Other(String),
}

impl ControlSignal {
    fn from_event(name: &str, payload: &Value) -> Self {
        match name {
            "conversation.chat.completed" => ControlSignal::ChatCompleted,
            "conversation.chat.failed" => ControlSignal::ChatFailed {
                message: error_message(payload),
            },
            "conversation.message.completed" => ControlSignal::MessageCompleted,
            "error" => ControlSignal::Error {
                message: error_message(payload),
            },
            other => ControlSignal::Other(other.to_string()),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, ControlSignal::Done)
    }
}

/// Pull a human-readable message out of an error-shaped payload.
fn error_message(payload: &Value) -> String {
    payload["last_error"]["msg"]
        .as_str()
        .or_else(|| payload["msg"].as_str())
        .or_else(|| payload["error"]["message"].as_str())
        .or_else(|| payload["message"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| payload.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiscardReason {
    /// Frame carried no `data:` field.
    NoData,
    /// `data:` was not valid JSON.
    PayloadDecodeFailed,
    /// Extracted text was itself a JSON object.
    LeakedStructuredPayload,
    /// A rule matched but produced an empty string.
    EmptyDelta,
    /// No rule matched an untyped frame.
    Unrecognized,
}

/// Text extraction rules, tried in order; the first that yields text wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionRule {
    /// Requires the frame's event to be the delta event; takes the named
    /// payload field when it is a string.
    DeltaField(&'static str),
    /// Requires an untyped frame (no `event:` line and no `event` key in the
    /// payload); takes `content` when it is a string that does not open a
    /// nested object.
    LegacyBareContent,
}

pub const EXTRACTION_RULES: [ExtractionRule; 3] = [
    ExtractionRule::DeltaField("content"),
    ExtractionRule::DeltaField("delta"),
    ExtractionRule::LegacyBareContent,
];

impl ExtractionRule {
    pub fn extract<'a>(
        &self,
        frame: &Frame,
        payload: &'a Value,
        config: &ClassifierConfig,
    ) -> Option<&'a str> {
        match self {
            ExtractionRule::DeltaField(field) => {
                if frame.event.as_deref() != Some(config.delta_event.as_str()) {
                    return None;
                }
                payload.get(*field)?.as_str()
            }
            ExtractionRule::LegacyBareContent => {
                if frame.event.is_some() || payload.get("event").is_some() {
                    return None;
                }
                let content = payload.get("content")?.as_str()?;
                (!content.trim_start().starts_with('{')).then_some(content)
            }
        }
    }
}

/// True when `text` is a complete JSON object rather than prose.
fn is_structured_payload(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with('{')
        && trimmed.ends_with('}')
        && serde_json::from_str::<Value>(trimmed).is_ok()
}

#[derive(Debug, Clone, Default)]
pub struct Classifier {
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    fn is_sentinel(&self, frame: &Frame, data: Option<&str>) -> bool {
        if let (Some(done_event), Some(event)) = (&self.config.done_event, &frame.event) {
            if done_event == event {
                return true;
            }
        }
        let Some(data) = data.map(str::trim) else {
            return false;
        };
        let sentinel = self.config.done_sentinel.as_str();
        data == sentinel
            || data
                .strip_prefix('"')
                .and_then(|d| d.strip_suffix('"'))
                .is_some_and(|inner| inner == sentinel)
    }

    pub fn classify(&self, frame: &Frame) -> ClassifiedEvent {
        let data = frame.data.as_deref();

        if self.is_sentinel(frame, data) {
            debug!(event = ?frame.event, "end-of-stream sentinel");
            return ClassifiedEvent::Control(ControlSignal::Done);
        }

        let Some(data) = data else {
            trace!(event = ?frame.event, "frame without data");
            return ClassifiedEvent::Discarded(DiscardReason::NoData);
        };

        let payload: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, event = ?frame.event, "payload is not JSON, discarding frame");
                return ClassifiedEvent::Discarded(DiscardReason::PayloadDecodeFailed);
            }
        };

        let extracted = EXTRACTION_RULES
            .iter()
            .find_map(|rule| rule.extract(frame, &payload, &self.config));

        match extracted {
            Some(text) if is_structured_payload(text) => {
                debug!(event = ?frame.event, "delta text is a JSON object, discarding");
                ClassifiedEvent::Discarded(DiscardReason::LeakedStructuredPayload)
            }
            Some("") => ClassifiedEvent::Discarded(DiscardReason::EmptyDelta),
            Some(text) => ClassifiedEvent::Delta(text.to_string()),
            None => match &frame.event {
                Some(event) if *event == self.config.delta_event => {
                    ClassifiedEvent::Discarded(DiscardReason::Unrecognized)
                }
                Some(event) => ClassifiedEvent::Control(ControlSignal::from_event(event, &payload)),
                None => ClassifiedEvent::Discarded(DiscardReason::Unrecognized),
            },
        }
    }
}
