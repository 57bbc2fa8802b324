//! Per-request reconstruction pipeline: bytes in, delta text out.
//!
//! ```text
//! bytes ─▶ Utf8Decoder ─▶ FrameParser ─▶ Classifier ─▶ DeltaSink
//! ```
//!
//! One pipeline serves exactly one request. Chunks are processed strictly in
//! arrival order, so the sink sees deltas in the order the upstream sent them.

use std::collections::BTreeMap;

use tracing::{debug, trace, warn};

use crate::accumulator::DeltaSink;
use crate::classify::{ClassifiedEvent, Classifier, ClassifierConfig, ControlSignal, DiscardReason};
use crate::decoder::Utf8Decoder;
use crate::frame::{Frame, FrameParser};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Streaming,
    Completed,
    Failed { message: String },
}

/// Terminal result of one request, as reported to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Failed { message: String },
    /// A newer request on the same surface took over; output was abandoned.
    Superseded,
}

/// Running counters, mostly for logs and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub chunks: usize,
    pub bytes: usize,
    pub frames: usize,
    pub deltas: usize,
    /// Appended text length in chars.
    pub chars: usize,
    pub controls: usize,
    pub discarded: BTreeMap<DiscardReason, usize>,
    /// Whether an unterminated frame was dropped at end of stream.
    pub dropped_partial_frame: bool,
}

impl PipelineStats {
    pub fn discarded(&self, reason: DiscardReason) -> usize {
        self.discarded.get(&reason).copied().unwrap_or(0)
    }
}

/// What one chunk did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkReport {
    pub frames: usize,
    pub deltas: usize,
    /// The chunk carried the end-of-stream sentinel.
    pub completed: bool,
}

#[derive(Debug)]
pub struct StreamPipeline {
    decoder: Utf8Decoder,
    parser: FrameParser,
    classifier: Classifier,
    state: PipelineState,
    stats: PipelineStats,
}

impl Default for StreamPipeline {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl StreamPipeline {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            decoder: Utf8Decoder::new(),
            parser: FrameParser::new(),
            classifier: Classifier::new(config),
            state: PipelineState::Idle,
            stats: PipelineStats::default(),
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn is_streaming(&self) -> bool {
        self.state == PipelineState::Streaming
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, PipelineState::Completed | PipelineState::Failed { .. })
    }

    /// Terminal outcome, once there is one.
    pub fn outcome(&self) -> Option<StreamOutcome> {
        match &self.state {
            PipelineState::Completed => Some(StreamOutcome::Completed),
            PipelineState::Failed { message } => Some(StreamOutcome::Failed {
                message: message.clone(),
            }),
            PipelineState::Idle | PipelineState::Streaming => None,
        }
    }

    /// Back to `Idle`, discarding all decoding state.
    pub fn reset(&mut self) {
        self.decoder = Utf8Decoder::new();
        self.parser = FrameParser::new();
        self.state = PipelineState::Idle;
        self.stats = PipelineStats::default();
    }

    /// Begin a request: clears the sink and enters `Streaming`.
    pub fn start<S: DeltaSink + ?Sized>(&mut self, sink: &mut S) {
        self.reset();
        sink.reset();
        self.state = PipelineState::Streaming;
    }

    /// Feed one network chunk. Ignored unless streaming.
    pub fn push_chunk<S: DeltaSink + ?Sized>(&mut self, chunk: &[u8], sink: &mut S) -> ChunkReport {
        let mut report = ChunkReport::default();
        if !self.is_streaming() {
            trace!(len = chunk.len(), state = ?self.state, "ignoring chunk outside streaming state");
            return report;
        }

        self.stats.chunks += 1;
        self.stats.bytes += chunk.len();

        let text = self.decoder.decode(chunk);
        let frames = self.parser.feed(&text);
        self.process_frames(frames, sink, &mut report);
        report
    }

    /// Transport closed without error.
    ///
    /// Returns the terminal outcome, or `None` if the pipeline was never
    /// started (nothing changes and the sink is not told anything).
    pub fn finish<S: DeltaSink + ?Sized>(&mut self, sink: &mut S) -> Option<StreamOutcome> {
        if self.is_streaming() {
            let tail = self.decoder.finish();
            if !tail.is_empty() {
                let frames = self.parser.feed(&tail);
                self.process_frames(frames, sink, &mut ChunkReport::default());
            }
        }
        if self.is_streaming() {
            self.stats.dropped_partial_frame = self.parser.finish();
            self.complete(sink);
        }
        self.outcome()
    }

    /// Transport failed. Text already delivered to the sink stays there.
    pub fn fail<S: DeltaSink + ?Sized>(&mut self, message: impl Into<String>, sink: &mut S) -> StreamOutcome {
        if self.is_terminal() {
            // Errors after the sentinel do not change a finished request.
            return self.outcome().unwrap_or(StreamOutcome::Completed);
        }
        let message = message.into();
        warn!(
            error = %message,
            deltas = self.stats.deltas,
            chars = self.stats.chars,
            "stream failed, keeping partial text"
        );
        self.state = PipelineState::Failed {
            message: message.clone(),
        };
        let outcome = StreamOutcome::Failed { message };
        sink.on_finish(&outcome);
        outcome
    }

    fn complete<S: DeltaSink + ?Sized>(&mut self, sink: &mut S) {
        debug!(
            frames = self.stats.frames,
            deltas = self.stats.deltas,
            chars = self.stats.chars,
            "stream completed"
        );
        self.state = PipelineState::Completed;
        sink.on_finish(&StreamOutcome::Completed);
    }

    fn process_frames<S: DeltaSink + ?Sized>(
        &mut self,
        frames: Vec<Frame>,
        sink: &mut S,
        report: &mut ChunkReport,
    ) {
        for frame in frames {
            if !self.is_streaming() {
                trace!("ignoring frame after end of stream");
                break;
            }
            self.stats.frames += 1;
            report.frames += 1;

            match self.classifier.classify(&frame) {
                ClassifiedEvent::Delta(text) => {
                    sink.on_delta(&text);
                    self.stats.deltas += 1;
                    self.stats.chars += text.chars().count();
                    report.deltas += 1;
                }
                ClassifiedEvent::Control(ControlSignal::Done) => {
                    report.completed = true;
                    self.complete(sink);
                }
                ClassifiedEvent::Control(signal) => {
                    self.stats.controls += 1;
                    match &signal {
                        ControlSignal::ChatFailed { message } | ControlSignal::Error { message } => {
                            warn!(error = %message, "upstream reported an error event");
                        }
                        other => debug!(signal = ?other, "control event"),
                    }
                }
                ClassifiedEvent::Discarded(reason) => {
                    *self.stats.discarded.entry(reason).or_default() += 1;
                }
            }
        }
    }
}
