//! Reconstruction of display text from an agent chat event stream.
//!
//! Raw network chunks go through four stages, each usable on its own:
//! [`Utf8Decoder`], [`FrameParser`], [`Classifier`] and a caller-owned
//! [`DeltaSink`]. [`StreamPipeline`] wires them together for one request.

pub mod accumulator;
pub mod classify;
pub mod decoder;
pub mod frame;
pub mod pipeline;

pub use accumulator::{DeltaSink, ResultBuffer};
pub use classify::{
    ClassifiedEvent, Classifier, ClassifierConfig, ControlSignal, DiscardReason, ExtractionRule,
    EXTRACTION_RULES,
};
pub use decoder::Utf8Decoder;
pub use frame::{Frame, FrameParser};
pub use pipeline::{ChunkReport, PipelineState, PipelineStats, StreamOutcome, StreamPipeline};
