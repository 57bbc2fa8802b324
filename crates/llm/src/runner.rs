//! The async read loop that drives one [`StreamPipeline`] from a network body.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use deltaflow_stream::{ClassifierConfig, DeltaSink, StreamOutcome, StreamPipeline};

use crate::provider::{ByteStream, ChatRequest, StreamingChatProvider};

/// Shown to the user when a stream fails. Partial text stays on screen.
pub const FALLBACK_MESSAGE: &str = "service temporarily unavailable, please retry";

/// One request surface (a terminal, a browser tab). Starting a request
/// supersedes whatever was still streaming there.
#[derive(Debug, Clone)]
pub struct RequestSlot {
    generation: Arc<watch::Sender<u64>>,
}

/// Proof of being the newest request on a [`RequestSlot`].
#[derive(Debug, Clone)]
pub struct RequestTicket {
    generation: u64,
    rx: watch::Receiver<u64>,
}

impl Default for RequestSlot {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            generation: Arc::new(tx),
        }
    }
}

impl RequestSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> RequestTicket {
        let mut generation = 0;
        self.generation.send_modify(|g| {
            *g += 1;
            generation = *g;
        });
        RequestTicket {
            generation,
            rx: self.generation.subscribe(),
        }
    }

    /// Invalidate the current ticket without starting a new request.
    pub fn cancel(&self) {
        self.generation.send_modify(|g| *g += 1);
    }
}

impl RequestTicket {
    pub fn is_current(&self) -> bool {
        *self.rx.borrow() == self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Resolves once a newer request has started on the slot. Never resolves
    /// if the slot itself is gone.
    pub async fn superseded(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() != self.generation {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Read `stream` to the end, feeding every chunk through `pipeline` in order.
///
/// The pipeline must already be started. Returns as soon as the sentinel is
/// seen (dropping the connection), on transport error, on clean close, or
/// when `ticket` is superseded. A superseded pump leaves the sink alone.
pub async fn pump<S: DeltaSink + ?Sized>(
    mut stream: ByteStream,
    pipeline: &mut StreamPipeline,
    sink: &mut S,
    ticket: &RequestTicket,
) -> StreamOutcome {
    loop {
        let next = tokio::select! {
            biased;
            _ = ticket.superseded() => {
                debug!(generation = ticket.generation(), "request superseded, abandoning stream");
                return StreamOutcome::Superseded;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                pipeline.push_chunk(&chunk, sink);
                if let Some(outcome) = pipeline.outcome() {
                    return outcome;
                }
            }
            Some(Err(e)) => return pipeline.fail(e.to_string(), sink),
            None => {
                return match pipeline.finish(sink) {
                    Some(outcome) => outcome,
                    None => pipeline.fail("stream closed before the request started", sink),
                }
            }
        }
    }
}

/// Open a chat stream and reconstruct it into `sink` with a fresh pipeline.
pub async fn run_chat<S: DeltaSink + ?Sized>(
    provider: &dyn StreamingChatProvider,
    request: &ChatRequest,
    config: &ClassifierConfig,
    sink: &mut S,
    ticket: &RequestTicket,
) -> StreamOutcome {
    let mut pipeline = StreamPipeline::new(config.clone());
    pipeline.start(sink);

    info!(
        provider = provider.provider_name(),
        bot_id = %request.bot_id,
        user_id = %request.user_id,
        "starting chat"
    );

    let stream = match provider.open_stream(request).await {
        Ok(stream) => stream,
        Err(e) => {
            if !ticket.is_current() {
                return StreamOutcome::Superseded;
            }
            warn!(error = %e, provider = provider.provider_name(), "could not open chat stream");
            return pipeline.fail(e.to_string(), sink);
        }
    };

    let outcome = pump(stream, &mut pipeline, sink, ticket).await;
    let stats = pipeline.stats();
    debug!(
        outcome = ?outcome,
        chunks = stats.chunks,
        frames = stats.frames,
        deltas = stats.deltas,
        chars = stats.chars,
        "chat finished"
    );
    outcome
}

/// What a [`ChannelSink`] forwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Delta(String),
    Finished(StreamOutcome),
}

/// Forwards deltas to another task, e.g. an HTTP response writer.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<SinkEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Resolves once the receiving side has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

impl DeltaSink for ChannelSink {
    fn on_delta(&mut self, text: &str) {
        // A closed receiver means the reader left; the caller notices via `closed()`.
        let _ = self.tx.send(SinkEvent::Delta(text.to_string()));
    }

    fn on_finish(&mut self, outcome: &StreamOutcome) {
        let _ = self.tx.send(SinkEvent::Finished(outcome.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockChatProvider;
    use crate::provider::LlmError;
    use bytes::Bytes;
    use futures::stream;
    use std::time::Duration;

    fn delta_frame(text: &str) -> Vec<u8> {
        format!(
            "event: conversation.message.delta\ndata: {}\n\n",
            serde_json::json!({ "content": text })
        )
        .into_bytes()
    }

    fn byte_stream(items: Vec<Result<Vec<u8>, &str>>) -> ByteStream {
        let items: Vec<Result<Bytes, LlmError>> = items
            .into_iter()
            .map(|i| i.map(Bytes::from).map_err(|m| LlmError::StreamError(m.to_string())))
            .collect();
        Box::pin(stream::iter(items))
    }

    #[derive(Default)]
    struct RecordingSink {
        deltas: Vec<String>,
        outcomes: Vec<StreamOutcome>,
        supersede_on_first_delta: Option<RequestSlot>,
    }

    impl DeltaSink for RecordingSink {
        fn on_delta(&mut self, text: &str) {
            self.deltas.push(text.to_string());
            if let Some(slot) = self.supersede_on_first_delta.take() {
                slot.begin();
            }
        }

        fn on_finish(&mut self, outcome: &StreamOutcome) {
            self.outcomes.push(outcome.clone());
        }
    }

    #[tokio::test]
    async fn transport_error_mid_stream_keeps_partial_text() {
        let slot = RequestSlot::new();
        let ticket = slot.begin();
        let mut pipeline = StreamPipeline::default();
        let mut sink = RecordingSink::default();
        pipeline.start(&mut sink);

        let body = byte_stream(vec![
            Ok(delta_frame("甲子")),
            Ok(delta_frame("年")),
            Err("connection reset by peer"),
            Ok(delta_frame("never")),
        ]);
        let outcome = pump(body, &mut pipeline, &mut sink, &ticket).await;

        assert!(matches!(outcome, StreamOutcome::Failed { ref message } if message.contains("connection reset")));
        assert_eq!(sink.deltas.concat(), "甲子年");
        assert_eq!(sink.outcomes, vec![outcome]);
    }

    #[tokio::test]
    async fn sentinel_stops_reading() {
        let ticket = RequestSlot::new().begin();
        let mut pipeline = StreamPipeline::default();
        let mut sink = RecordingSink::default();
        pipeline.start(&mut sink);

        let mut head = delta_frame("end");
        head.extend_from_slice(b"data: [DONE]\n\n");
        // A pump that kept reading would wait on the pending tail forever.
        let body: ByteStream = Box::pin(
            stream::iter(vec![Ok::<Bytes, LlmError>(Bytes::from(head))]).chain(stream::pending()),
        );

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            pump(body, &mut pipeline, &mut sink, &ticket),
        )
        .await
        .unwrap();
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(sink.deltas, vec!["end".to_string()]);
    }

    #[tokio::test]
    async fn clean_close_completes() {
        let ticket = RequestSlot::new().begin();
        let mut pipeline = StreamPipeline::default();
        let mut sink = RecordingSink::default();
        pipeline.start(&mut sink);

        let body = byte_stream(vec![Ok(delta_frame("a")), Ok(delta_frame("b"))]);
        let outcome = pump(body, &mut pipeline, &mut sink, &ticket).await;
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(sink.outcomes, vec![StreamOutcome::Completed]);
    }

    #[tokio::test]
    async fn newer_request_supersedes_running_pump() {
        let slot = RequestSlot::new();
        let ticket = slot.begin();
        let mut pipeline = StreamPipeline::default();
        let mut sink = RecordingSink {
            supersede_on_first_delta: Some(slot.clone()),
            ..Default::default()
        };
        pipeline.start(&mut sink);

        let body = byte_stream(vec![Ok(delta_frame("old-1")), Ok(delta_frame("old-2"))]);
        let outcome = pump(body, &mut pipeline, &mut sink, &ticket).await;

        assert_eq!(outcome, StreamOutcome::Superseded);
        assert_eq!(sink.deltas, vec!["old-1".to_string()]);
        assert!(sink.outcomes.is_empty());
        assert!(!ticket.is_current());
    }

    #[tokio::test]
    async fn supersede_wakes_a_pump_waiting_on_a_silent_upstream() {
        let slot = RequestSlot::new();
        let ticket = slot.begin();
        let mut pipeline = StreamPipeline::default();
        let mut sink = RecordingSink::default();
        pipeline.start(&mut sink);

        let body: ByteStream = Box::pin(
            stream::iter(vec![Ok::<Bytes, LlmError>(Bytes::from(delta_frame("partial")))])
                .chain(stream::pending()),
        );
        let newer = slot.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            newer.begin();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            pump(body, &mut pipeline, &mut sink, &ticket),
        )
        .await
        .unwrap();
        assert_eq!(outcome, StreamOutcome::Superseded);
        assert_eq!(sink.deltas, vec!["partial".to_string()]);
        assert!(sink.outcomes.is_empty());
    }

    #[test]
    fn begin_invalidates_older_tickets() {
        let slot = RequestSlot::new();
        let first = slot.begin();
        assert!(first.is_current());
        let second = slot.begin();
        assert!(!first.is_current());
        assert!(second.is_current());
        slot.cancel();
        assert!(!second.is_current());
    }

    #[tokio::test]
    async fn run_chat_reconstructs_provider_stream() {
        let mut body = delta_frame("你好");
        body.extend_from_slice(b"event: done\ndata: \"[DONE]\"\n\n");
        let provider = MockChatProvider::new(vec![&body[..5], &body[5..]]);
        let request = ChatRequest::new("hi", "bot");
        let mut sink = RecordingSink::default();

        let outcome = run_chat(
            &provider,
            &request,
            &ClassifierConfig::default(),
            &mut sink,
            &RequestSlot::new().begin(),
        )
        .await;

        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(sink.deltas.concat(), "你好");
        assert_eq!(provider.requests(), vec![request]);
    }

    #[tokio::test]
    async fn run_chat_reports_open_failure_once() {
        let provider = MockChatProvider::failing_with_status(500);
        let mut sink = RecordingSink::default();

        let outcome = run_chat(
            &provider,
            &ChatRequest::new("hi", "bot"),
            &ClassifierConfig::default(),
            &mut sink,
            &RequestSlot::new().begin(),
        )
        .await;

        assert!(matches!(outcome, StreamOutcome::Failed { ref message } if message.contains("500")));
        assert_eq!(sink.outcomes.len(), 1);
        assert!(sink.deltas.is_empty());
    }

    #[tokio::test]
    async fn channel_sink_forwards_in_order() {
        let (mut sink, mut rx) = ChannelSink::channel();
        let provider = MockChatProvider::new(vec![&delta_frame("x")[..], &delta_frame("y")[..]])
            .then_fail("eof");
        let outcome = run_chat(
            &provider,
            &ChatRequest::new("q", "bot"),
            &ClassifierConfig::default(),
            &mut sink,
            &RequestSlot::new().begin(),
        )
        .await;
        drop(sink);

        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        assert_eq!(
            events,
            vec![
                SinkEvent::Delta("x".into()),
                SinkEvent::Delta("y".into()),
                SinkEvent::Finished(outcome),
            ]
        );
    }
}
